//! Module-argument parsing: `sync=<topic>` and `sync_epsilon=<FSD>`
//! `key=value` entries, in the style of
//! `examples/original_source/src/modules/cron/cron.c`'s `process_args`.
//!
//! The original delegates duration parsing to `fsd_parse_duration`
//! (Flux Standard Duration: a bare number of seconds, or a number
//! suffixed `s`/`m`/`h`/`d`). That file wasn't part of the retrieved
//! source pack, so [`parse_fsd`] reimplements the same small grammar
//! from its documented behavior rather than porting it line-for-line.

use cron_kernel::CronError;

/// The module arguments accepted by `serve`: an optional sync-event
/// topic and epsilon. `sync_epsilon` is `None` when the module args
/// don't mention it at all, so callers can leave the manager's own
/// default (§4.5: 15ms) untouched rather than overwriting it with 0.
#[derive(Debug, Clone, Default)]
pub struct ModuleArgs {
    pub sync_topic: Option<String>,
    pub sync_epsilon: Option<f64>,
}

/// Parses `serve`'s freeform `key=value` arguments exactly as
/// `process_args` does: `sync=<topic>` and `sync_epsilon=<FSD>` are
/// recognized, anything else is a fatal "unknown option" error. A
/// malformed `sync_epsilon` value is logged and ignored rather than
/// treated as fatal, matching the original's `flux_log_error` +
/// continue on a bad FSD string.
pub fn parse_module_args(args: &[String]) -> Result<ModuleArgs, CronError> {
    let mut parsed = ModuleArgs::default();
    for arg in args {
        if let Some(topic) = arg.strip_prefix("sync=") {
            parsed.sync_topic = Some(topic.to_string());
        } else if let Some(fsd) = arg.strip_prefix("sync_epsilon=") {
            match parse_fsd(fsd) {
                Ok(secs) => parsed.sync_epsilon = Some(secs),
                Err(e) => tracing::warn!(option = arg, error = %e, "option ignored"),
            }
        } else {
            return Err(CronError::Protocol(format!("Unknown option `{arg}'")));
        }
    }
    Ok(parsed)
}

/// Parses a Flux Standard Duration string: an optional sign, a
/// decimal number, and an optional unit suffix (`s` seconds, `m`
/// minutes, `h` hours, `d` days). No suffix means seconds.
pub fn parse_fsd(s: &str) -> Result<f64, CronError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(CronError::SemanticParse("empty duration".into()));
    }
    let (number, multiplier) = match s.chars().last() {
        Some('s') => (&s[..s.len() - 1], 1.0),
        Some('m') => (&s[..s.len() - 1], 60.0),
        Some('h') => (&s[..s.len() - 1], 3600.0),
        Some('d') => (&s[..s.len() - 1], 86400.0),
        _ => (s, 1.0),
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| CronError::SemanticParse(format!("invalid duration {s:?}")))?;
    Ok(value * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_seconds() {
        assert_eq!(parse_fsd("30").unwrap(), 30.0);
        assert_eq!(parse_fsd("1.5s").unwrap(), 1.5);
    }

    #[test]
    fn parses_minutes_hours_days() {
        assert_eq!(parse_fsd("2m").unwrap(), 120.0);
        assert_eq!(parse_fsd("1h").unwrap(), 3600.0);
        assert_eq!(parse_fsd("1d").unwrap(), 86400.0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_fsd("banana").is_err());
        assert!(parse_fsd("").is_err());
    }

    #[test]
    fn module_args_recognizes_sync_and_epsilon() {
        let args = vec!["sync=heartbeat.pulse".to_string(), "sync_epsilon=5s".to_string()];
        let parsed = parse_module_args(&args).unwrap();
        assert_eq!(parsed.sync_topic.as_deref(), Some("heartbeat.pulse"));
        assert_eq!(parsed.sync_epsilon, Some(5.0));
    }

    #[test]
    fn module_args_rejects_unknown_option() {
        let args = vec!["bogus=1".to_string()];
        assert!(parse_module_args(&args).is_err());
    }

    #[test]
    fn module_args_ignores_bad_epsilon_rather_than_failing() {
        let args = vec!["sync_epsilon=banana".to_string()];
        let parsed = parse_module_args(&args).unwrap();
        assert_eq!(parsed.sync_epsilon, None);
    }
}
