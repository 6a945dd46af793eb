//! Crate-level error taxonomy for the cron service.
//!
//! Every error kind in §7 of the design has a variant here. Sub-modules
//! (the cronodate matcher, the task runner, the manager) construct these
//! directly rather than defining their own error enums, since the
//! taxonomy is small and shared end-to-end, from request handling down
//! to the task state machine.

use thiserror::Error;

/// All errors the cron service can produce.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CronError {
    /// Missing or mistyped request fields.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Unknown trigger type or unknown module argument.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// No entry (or subscription) with the given id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Out-of-range cronodate value, bad range/stride syntax, bad FSD.
    #[error("parse error: {0}")]
    SemanticParse(String),

    /// The remote-exec façade refused the request.
    #[error("dispatch failure (errno {0})")]
    DispatchFailure(i32),

    /// The remote side could not exec the command.
    #[error("exec failure (errno {0})")]
    ExecFailure(i32),

    /// The task exited with nonzero status or was terminated by a signal.
    #[error("runtime failure: {0}")]
    RuntimeFailure(String),

    /// The cronodate computation found no match within the search horizon.
    #[error("cronodate overflow: no match found")]
    Overflow,

    /// A low-level I/O error (e.g. spawning a local process).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result alias for the cron service.
pub type CronResult<T> = Result<T, CronError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_display() {
        let e = CronError::Protocol("missing field 'type'".into());
        assert!(e.to_string().contains("missing field 'type'"));
    }

    #[test]
    fn not_implemented_display() {
        let e = CronError::NotImplemented("trigger type 'foo'".into());
        assert!(matches!(e, CronError::NotImplemented(_)));
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: CronError = io_err.into();
        assert!(matches!(e, CronError::Io(_)));
    }

    #[test]
    fn serde_error_converts_via_from() {
        let bad = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let e: CronError = bad.into();
        assert!(matches!(e, CronError::Serialization(_)));
    }

    #[test]
    fn overflow_display() {
        assert_eq!(
            CronError::Overflow.to_string(),
            "cronodate overflow: no match found"
        );
    }
}
