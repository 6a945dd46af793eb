//! The event trigger: fires on messages matching a subscribed topic,
//! optionally gated by `after`/`nth` and throttled by `min_interval`.
//!
//! Grounded on `examples/original_source/src/modules/cron/event.c`.
//! The subscription is acquired once, at creation, and released once,
//! at destroy — `start`/`stop` only toggle whether arriving messages
//! are processed at all, matching the original's
//! `flux_msg_handler_start`/`stop` around an `flux_event_subscribe`
//! that happens once in `cron_event_create`. The counter resets to
//! zero on every `start`, per `cron_event_start`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cron_kernel::{Clock, CronError, EventBus};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::entry::CronEntry;

struct EventState {
    topic: String,
    nth: u32,
    after: u32,
    min_interval: f64,
    counter: u64,
    /// Set while a `min_interval` delayed dispatch is outstanding.
    /// While paused, `event_handler` still counts arriving events but
    /// skips the after/nth/min_interval recheck entirely — matching
    /// the original's `if (ev->paused) return;` right after
    /// `counter++`. Cleared when the delayed dispatch's one-shot timer
    /// fires.
    paused: bool,
}

#[derive(Clone)]
pub struct EventTrigger {
    state: Arc<Mutex<EventState>>,
    active: Arc<AtomicBool>,
    handle: Arc<JoinHandle<()>>,
    bus: Arc<dyn EventBus>,
    subscription_id: u64,
}

impl EventTrigger {
    pub async fn create(
        entry: CronEntry,
        clock: Arc<dyn Clock>,
        bus: Arc<dyn EventBus>,
        topic: String,
        nth: Option<u32>,
        after: Option<u32>,
        min_interval: Option<f64>,
    ) -> Result<Self, CronError> {
        let sub = bus.subscribe(&topic).await?;
        let subscription_id = sub.id;
        let mut receiver = sub.receiver;

        let state = Arc::new(Mutex::new(EventState {
            topic: topic.clone(),
            nth: nth.unwrap_or(0),
            after: after.unwrap_or(0),
            min_interval: min_interval.unwrap_or(0.0),
            counter: 0,
            paused: false,
        }));
        let active = Arc::new(AtomicBool::new(false));

        let state_task = state.clone();
        let active_task = active.clone();
        let handle = tokio::spawn(async move {
            loop {
                let msg = match receiver.recv().await {
                    Ok(m) => m,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if msg.topic != topic {
                    continue;
                }
                // The message handler itself is what start/stop toggles;
                // while stopped it never runs at all, so the counter
                // does not advance either.
                if !active_task.load(Ordering::SeqCst) {
                    continue;
                }

                let decision = {
                    let mut st = state_task.lock().await;
                    st.counter += 1;
                    if st.paused {
                        // A delayed dispatch is already outstanding;
                        // keep counting but don't re-evaluate until it
                        // fires and clears the pause.
                        None
                    } else if (st.counter as i64) < st.after as i64 {
                        None
                    } else if st.nth != 0 && (st.counter - st.after as u64) % st.nth as u64 != 0 {
                        None
                    } else if st.min_interval > 0.0 {
                        let now = clock.now();
                        let remaining = st.min_interval - (now - entry.last_run().await);
                        if remaining > 1e-5 {
                            st.paused = true;
                            Some(Some(remaining))
                        } else {
                            Some(None)
                        }
                    } else {
                        Some(None)
                    }
                };

                match decision {
                    None => {}
                    Some(None) => entry.schedule_task().await,
                    Some(Some(remaining)) => {
                        debug!(
                            entry = entry.id().await,
                            remaining, "delaying due to min interval"
                        );
                        let entry2 = entry.clone();
                        let active2 = active_task.clone();
                        let state2 = state_task.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_secs_f64(remaining.max(0.0))).await;
                            state2.lock().await.paused = false;
                            if active2.load(Ordering::SeqCst) {
                                entry2.schedule_task().await;
                            }
                        });
                    }
                }
            }
        });

        Ok(EventTrigger {
            state,
            active,
            handle: Arc::new(handle),
            bus,
            subscription_id,
        })
    }

    pub async fn start(&self) {
        let mut st = self.state.lock().await;
        st.counter = 0;
        st.paused = false;
        drop(st);
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub async fn destroy(self) {
        self.handle.abort();
        let _ = self.bus.unsubscribe(self.subscription_id).await;
    }

    pub async fn to_value(&self) -> serde_json::Value {
        let st = self.state.lock().await;
        serde_json::json!({
            "topic": st.topic,
            "nth": st.nth,
            "after": st.after,
            "counter": st.counter,
            "min_interval": st.min_interval,
        })
    }
}
