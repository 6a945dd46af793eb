//! Kernel contract for the cron service: traits and error types only.
//!
//! Nothing in this crate performs I/O. `cron-core` implements the
//! engine against these contracts; `cron-runtime` implements the
//! façade traits for a single-host deployment.

pub mod clock;
pub mod error;
pub mod facade;

pub use clock::{Clock, SystemClock};
pub use error::{CronError, CronResult};
pub use facade::{
    EventBus, EventMessage, ExitStatusKind, IoStream, RemoteEvent, RemoteExec, RemoteHandleId,
    SpawnRequest, Subscription,
};

#[cfg(any(test, feature = "testing"))]
pub use clock::testing::MockClock;
