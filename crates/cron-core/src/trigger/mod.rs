//! C4: trigger types.
//!
//! Grounded on `examples/original_source/src/modules/cron/types.c`'s
//! `cron_type_operations_lookup` table and the three `cron_entry_ops`
//! implementations (`interval.c`, `datetime.c`, `event.c`). The
//! original dispatches through a string-keyed table of function
//! pointers (§9's REDESIGN FLAGS calls this out explicitly); here each
//! trigger is a variant of one tagged enum sharing a single
//! `create`/`destroy`/`start`/`stop`/`to_value` surface, resolved at
//! compile time instead of through a runtime lookup table.

pub mod datetime;
pub mod event;
pub mod interval;

use cron_kernel::{Clock, CronError, EventBus};
use std::sync::Arc;

use crate::entry::CronEntry;

pub use datetime::DatetimeTrigger;
pub use event::EventTrigger;
pub use interval::IntervalTrigger;

/// One entry's trigger, tagged by type name the way
/// `cron_type_operations_lookup` resolves `"interval"`/`"event"`/
/// `"datetime"` to a `cron_entry_ops` table.
pub enum TriggerKind {
    Interval(IntervalTrigger),
    Datetime(DatetimeTrigger),
    Event(EventTrigger),
}

impl Clone for TriggerKind {
    fn clone(&self) -> Self {
        match self {
            TriggerKind::Interval(t) => TriggerKind::Interval(t.clone()),
            TriggerKind::Datetime(t) => TriggerKind::Datetime(t.clone()),
            TriggerKind::Event(t) => TriggerKind::Event(t.clone()),
        }
    }
}

impl TriggerKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            TriggerKind::Interval(_) => "interval",
            TriggerKind::Datetime(_) => "datetime",
            TriggerKind::Event(_) => "event",
        }
    }

    pub async fn start(&self) {
        match self {
            TriggerKind::Interval(t) => t.start(),
            TriggerKind::Datetime(t) => t.start(),
            TriggerKind::Event(t) => t.start().await,
        }
    }

    pub async fn stop(&self) {
        match self {
            TriggerKind::Interval(t) => t.stop(),
            TriggerKind::Datetime(t) => t.stop(),
            TriggerKind::Event(t) => t.stop(),
        }
    }

    /// Tears down the trigger's background task and, for the event
    /// trigger, releases its subscription. Consumes `self` since a
    /// destroyed trigger is never reused (mirrors `cron_entry_ops.destroy`,
    /// which frees the type data outright).
    pub async fn destroy(self) {
        match self {
            TriggerKind::Interval(t) => t.destroy(),
            TriggerKind::Datetime(t) => t.destroy(),
            TriggerKind::Event(t) => t.destroy().await,
        }
    }

    pub async fn to_value(&self) -> serde_json::Value {
        match self {
            TriggerKind::Interval(t) => t.to_value().await,
            TriggerKind::Datetime(t) => t.to_value().await,
            TriggerKind::Event(t) => t.to_value().await,
        }
    }
}

/// The type-specific `args` a `cron.create` request supplies,
/// pre-validated into typed fields rather than passed around as raw
/// JSON the way `ops.create (h, e, args)` receives it.
pub enum TriggerArgs {
    Interval {
        interval: f64,
        after: Option<f64>,
    },
    Datetime {
        units: Vec<(crate::cronodate::TmUnit, DatetimeUnitValue)>,
    },
    Event {
        topic: String,
        nth: Option<u32>,
        after: Option<u32>,
        min_interval: Option<f64>,
    },
}

/// A datetime unit value as accepted in a `cron.create` request's
/// `args`: either a range expression or a single integer, matching
/// `datetime_entry_from_json`'s `json_is_string`/`json_is_integer` split.
pub enum DatetimeUnitValue {
    Range(String),
    Integer(i32),
}

/// Builds the trigger variant named by `typename`, attaching it to
/// `entry` so its background task can call back into
/// [`CronEntry::schedule_task`] when it fires.
pub async fn create(
    typename: &str,
    args: TriggerArgs,
    entry: CronEntry,
    clock: Arc<dyn Clock>,
    bus: Arc<dyn EventBus>,
) -> Result<TriggerKind, CronError> {
    match (typename, args) {
        ("interval", TriggerArgs::Interval { interval, after }) => Ok(TriggerKind::Interval(
            IntervalTrigger::create(entry, clock, interval, after),
        )),
        ("datetime", TriggerArgs::Datetime { units }) => {
            Ok(TriggerKind::Datetime(DatetimeTrigger::create(
                entry, clock, units,
            )?))
        }
        (
            "event",
            TriggerArgs::Event {
                topic,
                nth,
                after,
                min_interval,
            },
        ) => Ok(TriggerKind::Event(
            EventTrigger::create(entry, clock, bus, topic, nth, after, min_interval).await?,
        )),
        (name, _) => Err(CronError::NotImplemented(format!(
            "unknown cron entry type {name:?}"
        ))),
    }
}
