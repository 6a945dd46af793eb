//! Single-host implementations of `cron-kernel`'s façade traits:
//! [`LocalRemoteExec`] dispatches subprocesses via `tokio::process`,
//! and [`LocalEventBus`] is an in-process pub/sub standing in for the
//! broker's event topics. `cron-cli` wires these into a
//! `cron_core::Manager`.

pub mod remote_exec;
pub mod transport;

pub use remote_exec::LocalRemoteExec;
pub use transport::LocalEventBus;
