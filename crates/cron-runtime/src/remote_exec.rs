//! `LocalRemoteExec`: dispatches commands as local subprocesses via
//! `tokio::process::Command`, the single-host stand-in for Flux's
//! `flux_rexec` RPC to a remote broker rank.
//!
//! "Rank" is accepted (it's part of the wire shape) but every task
//! runs on this host regardless of its value — a real multi-rank
//! broker would bind a different [`RemoteExec`] implementation that
//! actually dispatches by rank, per `cron-kernel::RemoteExec`'s doc
//! comment. Grounded on `examples/original_source/src/modules/cron/task.c`'s
//! `flux_rexec`/subprocess continuation callbacks, reimplemented here
//! against `tokio::process::Command` and piped stdio.

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use cron_kernel::{
    CronError, ExitStatusKind, IoStream, RemoteEvent, RemoteExec, RemoteHandleId, SpawnRequest,
};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

/// Dispatches subprocesses locally and tracks their pids so a later
/// `kill` can be delivered to the right process.
#[derive(Default)]
pub struct LocalRemoteExec {
    next_handle: AtomicU64,
    pids: Mutex<HashMap<RemoteHandleId, u32>>,
}

impl LocalRemoteExec {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteExec for LocalRemoteExec {
    async fn spawn(
        &self,
        req: SpawnRequest,
        events: broadcast::Sender<RemoteEvent>,
    ) -> Result<RemoteHandleId, CronError> {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&req.command)
            .current_dir(&req.cwd)
            .envs(&req.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let _ = events.send(RemoteEvent::Started);

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                let errno = e.raw_os_error().unwrap_or(-1);
                let _ = events.send(RemoteEvent::ExecFailed { errno });
                return Err(CronError::DispatchFailure(errno));
            }
        };

        let pid = child.id().unwrap_or(0);
        self.pids.lock().await.insert(handle, pid);
        let _ = events.send(RemoteEvent::Running { pid, rank: req.rank });

        if let Some(out) = child.stdout.take() {
            let tx = events.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = tx.send(RemoteEvent::Output {
                        stream: IoStream::Stdout,
                        line,
                    });
                }
            });
        }
        if let Some(err) = child.stderr.take() {
            let tx = events.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = tx.send(RemoteEvent::Output {
                        stream: IoStream::Stderr,
                        line,
                    });
                }
            });
        }

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    let _ = events.send(RemoteEvent::Exited {
                        status: exit_status_kind(status),
                    });
                    let _ = events.send(RemoteEvent::Completed);
                }
                Err(e) => {
                    warn!(error = %e, "failed to wait on dispatched subprocess");
                    let _ = events.send(RemoteEvent::Completed);
                }
            }
        });

        Ok(handle)
    }

    async fn kill(&self, handle: RemoteHandleId, signal_num: i32) -> Result<(), CronError> {
        let pid = {
            let pids = self.pids.lock().await;
            *pids
                .get(&handle)
                .ok_or_else(|| CronError::NotFound(format!("remote handle {handle}")))?
        };
        let sig = Signal::try_from(signal_num)
            .map_err(|_| CronError::Protocol(format!("invalid signal {signal_num}")))?;
        signal::kill(Pid::from_raw(pid as i32), sig)
            .map_err(|e| CronError::Protocol(format!("kill({pid}, {signal_num}) failed: {e}")))
    }
}

fn exit_status_kind(status: std::process::ExitStatus) -> ExitStatusKind {
    if let Some(sig) = status.signal() {
        ExitStatusKind::Signal(sig)
    } else {
        ExitStatusKind::Code(status.code().unwrap_or(-1))
    }
}
