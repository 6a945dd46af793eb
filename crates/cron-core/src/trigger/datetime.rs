//! The datetime trigger: fires whenever the current broken-down time
//! matches a per-unit [`Cronodate`] schedule.
//!
//! Grounded on `examples/original_source/src/modules/cron/datetime.c`.
//! `reschedule_cb`'s "compute next wakeup, or push 1e19 into the
//! future and stop safely on overflow" behavior is reproduced as a
//! loop that ends (rather than sleeping effectively forever) on
//! overflow, since nothing will ever make it match again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cron_kernel::{Clock, CronError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::error;

use crate::cronodate::{Cronodate, TmUnit};
use crate::entry::CronEntry;
use crate::trigger::DatetimeUnitValue;

#[derive(Clone)]
pub struct DatetimeTrigger {
    cronodate: Arc<Mutex<Cronodate>>,
    active: Arc<AtomicBool>,
    next_wakeup: Arc<Mutex<Option<f64>>>,
    handle: Arc<JoinHandle<()>>,
}

impl DatetimeTrigger {
    pub fn create(
        entry: CronEntry,
        clock: Arc<dyn Clock>,
        units: Vec<(TmUnit, DatetimeUnitValue)>,
    ) -> Result<Self, CronError> {
        let mut date = Cronodate::new();
        date.fillset();
        for (unit, value) in units {
            match value {
                DatetimeUnitValue::Range(range) => date.set(unit, &range)?,
                DatetimeUnitValue::Integer(v) => date.set_integer(unit, v)?,
            }
        }
        let cronodate = Arc::new(Mutex::new(date));
        let active = Arc::new(AtomicBool::new(false));
        let next_wakeup = Arc::new(Mutex::new(None));

        let cronodate_task = cronodate.clone();
        let active_task = active.clone();
        let next_wakeup_task = next_wakeup.clone();
        let handle = tokio::spawn(async move {
            loop {
                let now = clock.now();
                let remaining = {
                    let d = cronodate_task.lock().await;
                    d.remaining(now)
                };
                match remaining {
                    Ok(r) => {
                        *next_wakeup_task.lock().await = Some(now + r);
                        tokio::time::sleep(Duration::from_secs_f64(r.max(0.0))).await;
                        if active_task.load(Ordering::SeqCst) {
                            entry.schedule_task().await;
                        }
                    }
                    Err(_) => {
                        let (repeat, count) = entry.repeat_and_count().await;
                        if repeat == 0 || (count as i64 + 1) < repeat {
                            error!(
                                entry = entry.id().await,
                                "unable to get next wakeup, stopping"
                            );
                        }
                        entry.stop_safe().await;
                        break;
                    }
                }
            }
        });

        Ok(DatetimeTrigger {
            cronodate,
            active,
            next_wakeup,
            handle: Arc::new(handle),
        })
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
        let mut obj = serde_json::Map::new();
        if let Some(w) = *self.next_wakeup.lock().await {
            obj.insert("next_wakeup".into(), w.into());
        }
        let d = self.cronodate.lock().await;
        for unit in [
            TmUnit::Sec,
            TmUnit::Min,
            TmUnit::Hour,
            TmUnit::Mday,
            TmUnit::Mon,
            TmUnit::Year,
            TmUnit::Wday,
        ] {
            obj.insert(unit.name().to_string(), d.get(unit).into());
        }
        serde_json::Value::Object(obj)
    }
}
