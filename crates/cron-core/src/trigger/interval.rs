//! The interval trigger: fires every `interval` seconds, first firing
//! after `after` seconds (default: `interval`).
//!
//! Grounded on `examples/original_source/src/modules/cron/interval.c`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cron_kernel::Clock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::entry::CronEntry;

#[derive(Clone)]
pub struct IntervalTrigger {
    after: f64,
    seconds: f64,
    active: Arc<AtomicBool>,
    next_wakeup: Arc<Mutex<f64>>,
    handle: Arc<JoinHandle<()>>,
}

impl IntervalTrigger {
    pub fn create(entry: CronEntry, clock: Arc<dyn Clock>, interval: f64, after: Option<f64>) -> Self {
        let after = after.filter(|a| *a >= 0.0).unwrap_or(interval);
        let active = Arc::new(AtomicBool::new(false));
        let next_wakeup = Arc::new(Mutex::new(clock.now() + after));

        let active_task = active.clone();
        let next_wakeup_task = next_wakeup.clone();
        let handle = tokio::spawn(async move {
            let mut first = true;
            loop {
                let delay = if first { after } else { interval };
                first = false;
                {
                    let mut nw = next_wakeup_task.lock().await;
                    *nw = clock.now() + delay;
                }
                tokio::time::sleep(Duration::from_secs_f64(delay.max(0.0))).await;
                if active_task.load(Ordering::SeqCst) {
                    entry.schedule_task().await;
                }
            }
        });

        IntervalTrigger {
            after,
            seconds: interval,
            active,
            next_wakeup,
            handle: Arc::new(handle),
        }
    }

    pub fn start(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn destroy(self) {
        self.handle.abort();
    }

    pub async fn to_value(&self) -> serde_json::Value {
        let next_wakeup = *self.next_wakeup.lock().await;
        serde_json::json!({
            "interval": self.seconds,
            "after": self.after,
            "next_wakeup": next_wakeup,
        })
    }
}
