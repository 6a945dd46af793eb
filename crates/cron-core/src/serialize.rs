//! C6: serialization — translating the wire JSON for `cron.create`,
//! `cron.delete`, `cron.list`, `cron.start`, `cron.stop`, and
//! `cron.sync` to and from the typed request/response structures
//! `cron-core` works with internally.
//!
//! Grounded on the `json_unpack`/`json_pack` calls in
//! `examples/original_source/src/modules/cron/cron.c`,
//! `interval.c`, `datetime.c`, and `event.c`.

use std::collections::HashMap;

use cron_kernel::CronError;
use serde::{Deserialize, Serialize};

use crate::cronodate::TmUnit;
use crate::trigger::{DatetimeUnitValue, TriggerArgs};

/// `cron.create` request body.
#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub environ: Option<HashMap<String, String>>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub repeat: Option<i64>,
    #[serde(default)]
    pub rank: Option<i64>,
    #[serde(rename = "task-history-count", default)]
    pub task_history_count: Option<i64>,
    #[serde(rename = "stop-on-failure", default)]
    pub stop_on_failure: Option<i64>,
    #[serde(default)]
    pub timeout: Option<f64>,
}

/// `cron.delete` request body.
#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub id: u64,
    #[serde(default)]
    pub kill: bool,
}

/// Shared request body for `cron.start`/`cron.stop`.
#[derive(Debug, Deserialize)]
pub struct IdRequest {
    pub id: u64,
}

/// `cron.sync` request body. Every field is optional: an absent
/// `topic` with `disable` unset leaves the sync event untouched and
/// only updates `sync_epsilon` if given.
#[derive(Debug, Deserialize, Default)]
pub struct SyncRequest {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub disable: bool,
    #[serde(default)]
    pub sync_epsilon: Option<f64>,
}

/// `cron.sync` response body.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SyncResponse {
    Enabled {
        sync_event: String,
        sync_epsilon: f64,
    },
    Disabled {
        sync_disabled: bool,
    },
}

/// `cron.list` response body: `{ "entries": [ ... ] }`.
pub fn list_response(entries: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({ "entries": entries })
}

const DATETIME_UNIT_KEYS: [(&str, TmUnit); 7] = [
    ("second", TmUnit::Sec),
    ("minute", TmUnit::Min),
    ("hour", TmUnit::Hour),
    ("mday", TmUnit::Mday),
    ("month", TmUnit::Mon),
    ("weekday", TmUnit::Wday),
    ("year", TmUnit::Year),
];

/// Parses the `args` object of a `cron.create` request into the typed
/// construction parameters for the named trigger type. Mirrors
/// `cron_interval_create`/`datetime_entry_from_json`/`cron_event_create`'s
/// `json_unpack` calls.
pub fn parse_trigger_args(kind: &str, args: &serde_json::Value) -> Result<TriggerArgs, CronError> {
    match kind {
        "interval" => {
            let interval = args
                .get("interval")
                .and_then(|v| v.as_f64())
                .ok_or_else(|| CronError::Protocol("interval: missing 'interval'".into()))?;
            let after = args.get("after").and_then(|v| v.as_f64());
            Ok(TriggerArgs::Interval { interval, after })
        }
        "datetime" => {
            let mut units = Vec::new();
            for (key, unit) in DATETIME_UNIT_KEYS {
                let Some(val) = args.get(key) else {
                    continue;
                };
                if let Some(s) = val.as_str() {
                    units.push((unit, DatetimeUnitValue::Range(s.to_string())));
                } else if let Some(n) = val.as_i64() {
                    units.push((unit, DatetimeUnitValue::Integer(n as i32)));
                } else {
                    return Err(CronError::Protocol(format!(
                        "datetime: {key} must be a string or integer"
                    )));
                }
            }
            Ok(TriggerArgs::Datetime { units })
        }
        "event" => {
            let topic = args
                .get("topic")
                .and_then(|v| v.as_str())
                .ok_or_else(|| CronError::Protocol("event: missing 'topic'".into()))?
                .to_string();
            let nth = args.get("nth").and_then(|v| v.as_u64()).map(|n| n as u32);
            let after = args
                .get("after")
                .and_then(|v| v.as_u64())
                .map(|n| n as u32);
            let min_interval = args.get("min_interval").and_then(|v| v.as_f64());
            Ok(TriggerArgs::Event {
                topic,
                nth,
                after,
                min_interval,
            })
        }
        other => Err(CronError::NotImplemented(format!(
            "unknown cron entry type {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_interval_args() {
        let args = serde_json::json!({"interval": 60.0, "after": 5.0});
        let parsed = parse_trigger_args("interval", &args).unwrap();
        match parsed {
            TriggerArgs::Interval { interval, after } => {
                assert_eq!(interval, 60.0);
                assert_eq!(after, Some(5.0));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_datetime_args_mixed_types() {
        let args = serde_json::json!({"minute": "0,30", "hour": 9});
        let parsed = parse_trigger_args("datetime", &args).unwrap();
        match parsed {
            TriggerArgs::Datetime { units } => {
                assert_eq!(units.len(), 2);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_event_args() {
        let args = serde_json::json!({"topic": "heartbeat.pulse", "nth": 5});
        let parsed = parse_trigger_args("event", &args).unwrap();
        match parsed {
            TriggerArgs::Event { topic, nth, .. } => {
                assert_eq!(topic, "heartbeat.pulse");
                assert_eq!(nth, Some(5));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let args = serde_json::json!({});
        assert!(parse_trigger_args("bogus", &args).is_err());
    }

    #[test]
    fn interval_requires_interval_field() {
        let args = serde_json::json!({"after": 5.0});
        assert!(parse_trigger_args("interval", &args).is_err());
    }
}
