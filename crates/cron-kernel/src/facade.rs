//! Interfaces for the external collaborators named in §6 of the design:
//! the subprocess remote-exec façade and the RPC/message transport and
//! eventlog façade. Neither is re-specified here — only the seam the
//! cron engine needs is declared as a trait, per the system brief
//! ("out of scope... specified only via their interfaces").
//!
//! `cron-runtime` provides the concrete, single-host implementations
//! used by `cron-cli`; tests in `cron-core` use hand-rolled mocks
//! against the same traits.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::CronError;

// ---------------------------------------------------------------------
// Remote-exec façade
// ---------------------------------------------------------------------

/// Opaque handle identifying one in-flight remote subprocess invocation.
pub type RemoteHandleId = u64;

/// Parameters for one subprocess invocation, built the way the task
/// runner assembles them: a shell wrapping the command string so that
/// quoting and expansion are honoured, plus cwd and environment.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub rank: i64,
    pub command: String,
    pub cwd: String,
    pub env: HashMap<String, String>,
}

/// Which stream an output line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStream {
    Stdout,
    Stderr,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatusKind {
    /// Exited normally with the given code.
    Code(i32),
    /// Terminated by the given signal number.
    Signal(i32),
}

/// Lifecycle events emitted by a [`RemoteExec`] implementation for one
/// spawned task, in the order the task runner expects them.
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    /// The dispatch request was accepted locally; the process is being
    /// started.
    Started,
    /// The remote side reports the process is now running.
    Running { pid: u32, rank: i64 },
    /// One trimmed line of output.
    Output { stream: IoStream, line: String },
    /// The remote side could not exec the command.
    ExecFailed { errno: i32 },
    /// The process exited or was signaled.
    Exited { status: ExitStatusKind },
    /// All I/O has drained and the handle may be torn down.
    Completed,
}

/// Spawns and controls one subprocess per call, on a selected broker
/// rank. Implementations deliver [`RemoteEvent`]s on the supplied
/// channel until `Completed`, then send nothing more.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Fire a remote-exec request. Returns the handle id on success, or
    /// a [`CronError::DispatchFailure`] if the façade itself refused the
    /// request synchronously (e.g. the target rank is unreachable).
    /// Once accepted, all further outcomes (including exec failure on
    /// the remote side) are reported as [`RemoteEvent`]s, not as an
    /// `Err` here.
    async fn spawn(
        &self,
        req: SpawnRequest,
        events: broadcast::Sender<RemoteEvent>,
    ) -> Result<RemoteHandleId, CronError>;

    /// Send a signal to a running task. Fire-and-forget: the façade's
    /// response, if any, is discarded.
    async fn kill(&self, handle: RemoteHandleId, signal: i32) -> Result<(), CronError>;
}

// ---------------------------------------------------------------------
// Transport / eventlog façade
// ---------------------------------------------------------------------

/// One message observed on a subscribed topic.
#[derive(Debug, Clone)]
pub struct EventMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// A live subscription to a topic. Dropping the receiver does not
/// unsubscribe on the broker side — callers must explicitly call
/// [`EventBus::unsubscribe`] to release it, preserving the
/// exactly-once subscribe/unsubscribe discipline the trigger types
/// depend on.
pub struct Subscription {
    pub id: u64,
    pub receiver: broadcast::Receiver<EventMessage>,
}

/// Minimal surface of the broker's RPC/message transport and eventlog
/// that the cron service depends on: topic subscription for the event
/// trigger and the sync-event gate.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Subscribe to an exact topic string (no glob matching).
    async fn subscribe(&self, topic: &str) -> Result<Subscription, CronError>;

    /// Release a subscription acquired via [`EventBus::subscribe`].
    async fn unsubscribe(&self, id: u64) -> Result<(), CronError>;

    /// Publish a message on a topic. Used by test harnesses and by a
    /// host that wants to drive its own sync event locally.
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), CronError>;
}
