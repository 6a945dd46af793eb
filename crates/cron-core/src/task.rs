//! C2: the task runner.
//!
//! A [`Task`] is one remote subprocess invocation dispatched by an
//! entry: it tracks the lifecycle Flux's `flux_rexec` reports
//! (dispatch accepted, started, running, exited, completed) and
//! renders itself to the JSON shape `cron.list` returns.
//!
//! Grounded on `examples/original_source/src/modules/cron/task.c`.
//! The state machine, the derived state-string logic in
//! `cron_task_state_string`, and the JSON field set in
//! `cron_task_to_json` are reproduced field-for-field; the event
//! delivery mechanism (Flux's subprocess callbacks) is replaced with a
//! `tokio::sync::broadcast` stream of [`RemoteEvent`]s driven by a
//! background task, the way `mofa-foundation`'s scheduler drives a
//! timer loop rather than polling.

use std::sync::Arc;

use cron_kernel::{
    Clock, CronError, ExitStatusKind, IoStream, RemoteEvent, RemoteExec, RemoteHandleId,
    SpawnRequest,
};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Identifying context attached to every log line a task emits, so
/// stdout/stderr forwarding and state-change logging can be traced
/// back to the owning entry without the task needing to know about
/// entries at all.
#[derive(Debug, Clone)]
pub struct TaskLogTags {
    pub entry_id: u64,
    pub entry_name: String,
    pub rank: i64,
    pub command: String,
}

/// One dispatched subprocess invocation and its observed lifecycle.
#[derive(Debug, Clone)]
pub struct Task {
    rank: i64,
    pid: Option<u32>,
    /// Raw lifecycle state, updated verbatim as events arrive
    /// ("Initialized", "Started", "Running", a signal name, "Exit N",
    /// "Exited", "Exec Failure", "Rexec Failure").
    state: String,

    timeout: f64,
    exit_status: Option<ExitStatusKind>,
    rexec_errno: Option<i32>,
    exec_errno: Option<i32>,

    create_time: f64,
    start_time: Option<f64>,
    running_time: Option<f64>,
    end_time: Option<f64>,

    started: bool,
    rexec_failed: bool,
    exec_failed: bool,
    running: bool,
    timedout: bool,
    exited: bool,
    completed: bool,

    remote_handle: Option<RemoteHandleId>,
}

impl Task {
    pub fn new(clock: &dyn Clock) -> Self {
        Task {
            rank: -1,
            pid: None,
            state: "Initialized".to_string(),
            timeout: 0.0,
            exit_status: None,
            rexec_errno: None,
            exec_errno: None,
            create_time: clock.now(),
            start_time: None,
            running_time: None,
            end_time: None,
            started: false,
            rexec_failed: false,
            exec_failed: false,
            running: false,
            timedout: false,
            exited: false,
            completed: false,
            remote_handle: None,
        }
    }

    pub fn set_timeout(&mut self, timeout: f64) {
        self.timeout = timeout;
    }

    /// Raw lifecycle state string (what `cron_task_state()` returns).
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.running && !self.exited
    }

    /// Mirrors `cron_task_status(t) != 0`: true if the subprocess
    /// exited nonzero or was terminated by a signal.
    pub fn exit_status_nonzero(&self) -> bool {
        !matches!(self.exit_status, None | Some(ExitStatusKind::Code(0)))
    }

    /// True once the task can no longer change: dispatch/exec failed,
    /// or the subprocess has fully completed (exited and I/O drained).
    pub fn is_finished(&self) -> bool {
        self.rexec_failed || self.exec_failed || self.completed
    }

    /// The state string `cron_task_state_string` derives from flags,
    /// used for the `state` field in [`Task::to_value`] — distinct
    /// from the raw [`Task::state`] accessor.
    fn derived_state_string(&self) -> &'static str {
        if self.rexec_errno.is_some() {
            "Rexec Failure"
        } else if self.exec_errno.is_some() {
            "Exec Failure"
        } else if !self.started {
            "Deferred"
        } else if !self.exited {
            "Running"
        } else if self.timedout {
            "Timeout"
        } else if !matches!(self.exit_status, Some(ExitStatusKind::Code(0)) | None) {
            "Failed"
        } else {
            "Exited"
        }
    }

    /// Dispatches this task's subprocess via `remote` and spawns a
    /// background driver that applies each [`RemoteEvent`] to this
    /// task (behind `shared`) as it arrives, logging I/O and state
    /// transitions tagged with `tags`. Sends on `finished` exactly
    /// once, when the task reaches [`Task::is_finished`].
    pub async fn run(
        shared: Arc<Mutex<Task>>,
        remote: Arc<dyn RemoteExec>,
        clock: Arc<dyn Clock>,
        req: SpawnRequest,
        tags: TaskLogTags,
        finished: oneshot::Sender<()>,
    ) -> Result<JoinHandle<()>, CronError> {
        let (tx, mut rx) = broadcast::channel(256);
        let rank = req.rank;
        {
            let mut t = shared.lock().await;
            t.rank = rank;
        }

        let handle = match remote.spawn(req, tx).await {
            Ok(h) => h,
            Err(CronError::DispatchFailure(errno)) => {
                let mut t = shared.lock().await;
                t.rexec_failed = true;
                t.rexec_errno = Some(errno);
                t.state = "Rexec Failure".to_string();
                error!(entry = tags.entry_name, errno, "rexec dispatch failed");
                let _ = finished.send(());
                return Ok(tokio::spawn(async {}));
            }
            Err(e) => return Err(e),
        };
        {
            let mut t = shared.lock().await;
            t.remote_handle = Some(handle);
        }

        let timeout = shared.lock().await.timeout;
        if timeout > 0.0 {
            let timeout_shared = shared.clone();
            let timeout_remote = remote.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_secs_f64(timeout)).await;
                let mut t = timeout_shared.lock().await;
                if t.is_finished() {
                    return;
                }
                t.mark_timed_out();
                let _ = t.kill(timeout_remote.as_ref(), 15).await;
            });
        }

        Ok(tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                let done = {
                    let mut t = shared.lock().await;
                    t.apply_event(&event, clock.as_ref(), &tags)
                };
                if done {
                    let _ = finished.send(());
                    break;
                }
            }
        }))
    }

    fn apply_event(&mut self, event: &RemoteEvent, clock: &dyn Clock, tags: &TaskLogTags) -> bool {
        match event {
            RemoteEvent::Started => {
                self.state = "Started".to_string();
                self.started = true;
                self.start_time = Some(clock.now());
            }
            RemoteEvent::Running { pid, rank } => {
                self.state = "Running".to_string();
                self.running = true;
                self.running_time = Some(clock.now());
                self.pid = Some(*pid);
                self.rank = *rank;
                info!(
                    entry = tags.entry_name,
                    rank,
                    pid,
                    command = tags.command,
                    "task running"
                );
            }
            RemoteEvent::Output { stream, line } => {
                match stream {
                    IoStream::Stdout => info!(
                        entry = tags.entry_name,
                        rank = tags.rank,
                        command = tags.command,
                        "{line}"
                    ),
                    IoStream::Stderr => error!(
                        entry = tags.entry_name,
                        rank = tags.rank,
                        command = tags.command,
                        "{line}"
                    ),
                }
                return false;
            }
            RemoteEvent::ExecFailed { errno } => {
                self.exec_failed = true;
                self.exec_errno = Some(*errno);
                self.state = "Exec Failure".to_string();
                self.end_time = Some(clock.now());
                error!(entry = tags.entry_name, errno, "exec failed");
                return true;
            }
            RemoteEvent::Exited { status } => {
                self.exited = true;
                self.exit_status = Some(*status);
                self.end_time = Some(clock.now());
                match status {
                    ExitStatusKind::Signal(sig) => self.state = signal_name(*sig).to_string(),
                    ExitStatusKind::Code(0) => self.state = "Exited".to_string(),
                    ExitStatusKind::Code(code) => self.state = format!("Exit {code}"),
                }
                return false;
            }
            RemoteEvent::Completed => {
                self.completed = true;
                return true;
            }
        }
        false
    }

    /// Sends `signal` to the running remote process. Refuses if the
    /// task never started or has already exited.
    pub async fn kill(&self, remote: &dyn RemoteExec, signal: i32) -> Result<(), CronError> {
        if !self.running || self.exited {
            return Err(CronError::Protocol("task is not running".into()));
        }
        let handle = self
            .remote_handle
            .ok_or_else(|| CronError::Protocol("task has no remote handle".into()))?;
        remote.kill(handle, signal).await
    }

    pub fn mark_timed_out(&mut self) {
        self.timedout = true;
    }

    pub fn timeout(&self) -> f64 {
        self.timeout
    }

    /// Renders this task as the JSON object `cron.list` embeds per
    /// entry, matching `cron_task_to_json` field-for-field.
    pub fn to_value(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("rank".into(), self.rank.into());
        obj.insert("pid".into(), self.pid.unwrap_or(0).into());
        obj.insert("status".into(), self.raw_status().into());
        obj.insert("state".into(), self.derived_state_string().into());
        obj.insert("create-time".into(), self.create_time.into());

        if let Some(errno) = self.rexec_errno {
            obj.insert("rexec_errno".into(), errno.into());
        }
        if let Some(errno) = self.exec_errno {
            obj.insert("exec_errno".into(), errno.into());
        }
        if self.timedout {
            obj.insert("timedout".into(), true.into());
        }
        if self.is_finished() {
            obj.insert("code".into(), self.exit_code().into());
        }
        if self.started {
            if let Some(t) = self.start_time {
                obj.insert("start-time".into(), t.into());
            }
        }
        if self.running {
            if let Some(t) = self.running_time {
                obj.insert("running-time".into(), t.into());
            }
        }
        if self.is_finished() {
            if let Some(t) = self.end_time {
                obj.insert("end-time".into(), t.into());
            }
        }
        serde_json::Value::Object(obj)
    }

    fn raw_status(&self) -> i32 {
        match self.exit_status {
            Some(ExitStatusKind::Code(c)) => c,
            Some(ExitStatusKind::Signal(s)) => -s,
            None => 0,
        }
    }

    fn exit_code(&self) -> i32 {
        match self.exit_status {
            Some(ExitStatusKind::Code(c)) => c,
            Some(ExitStatusKind::Signal(s)) => 128 + s,
            None => 0,
        }
    }
}

/// A small `strsignal`-equivalent for the handful of signals a
/// dispatched task is realistically terminated by.
fn signal_name(sig: i32) -> &'static str {
    match sig {
        1 => "Hangup",
        2 => "Interrupt",
        3 => "Quit",
        4 => "Illegal instruction",
        6 => "Aborted",
        8 => "Floating point exception",
        9 => "Killed",
        11 => "Segmentation fault",
        13 => "Broken pipe",
        14 => "Alarm clock",
        15 => "Terminated",
        _ => "Unknown signal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cron_kernel::SystemClock;

    fn tags() -> TaskLogTags {
        TaskLogTags {
            entry_id: 1,
            entry_name: "test".into(),
            rank: 0,
            command: "true".into(),
        }
    }

    #[test]
    fn new_task_starts_initialized() {
        let clock = SystemClock;
        let t = Task::new(&clock);
        assert_eq!(t.state(), "Initialized");
        assert!(!t.is_finished());
        assert_eq!(t.derived_state_string(), "Deferred");
    }

    #[test]
    fn apply_events_drive_state_machine() {
        let clock = SystemClock;
        let mut t = Task::new(&clock);
        let tags = tags();
        assert!(!t.apply_event(&RemoteEvent::Started, &clock, &tags));
        assert_eq!(t.state(), "Started");
        assert!(!t.apply_event(
            &RemoteEvent::Running { pid: 42, rank: 0 },
            &clock,
            &tags
        ));
        assert_eq!(t.derived_state_string(), "Running");
        assert!(!t.apply_event(
            &RemoteEvent::Exited {
                status: ExitStatusKind::Code(0)
            },
            &clock,
            &tags
        ));
        assert_eq!(t.derived_state_string(), "Exited");
        assert!(t.apply_event(&RemoteEvent::Completed, &clock, &tags));
        assert!(t.is_finished());
    }

    #[test]
    fn nonzero_exit_is_failed() {
        let clock = SystemClock;
        let mut t = Task::new(&clock);
        let tags = tags();
        t.apply_event(&RemoteEvent::Started, &clock, &tags);
        t.apply_event(&RemoteEvent::Running { pid: 1, rank: 0 }, &clock, &tags);
        t.apply_event(
            &RemoteEvent::Exited {
                status: ExitStatusKind::Code(7),
            },
            &clock,
            &tags,
        );
        t.apply_event(&RemoteEvent::Completed, &clock, &tags);
        assert_eq!(t.derived_state_string(), "Failed");
        assert_eq!(t.state(), "Exit 7");
        assert_eq!(t.exit_code(), 7);
    }

    #[test]
    fn timeout_flag_overrides_derived_state() {
        let clock = SystemClock;
        let mut t = Task::new(&clock);
        let tags = tags();
        t.apply_event(&RemoteEvent::Started, &clock, &tags);
        t.apply_event(&RemoteEvent::Running { pid: 1, rank: 0 }, &clock, &tags);
        t.mark_timed_out();
        t.apply_event(
            &RemoteEvent::Exited {
                status: ExitStatusKind::Signal(15),
            },
            &clock,
            &tags,
        );
        assert_eq!(t.state(), "Terminated");
        assert_eq!(t.derived_state_string(), "Timeout");
    }

    #[test]
    fn exec_failure_marks_finished_immediately() {
        let clock = SystemClock;
        let mut t = Task::new(&clock);
        let tags = tags();
        let done = t.apply_event(&RemoteEvent::ExecFailed { errno: 2 }, &clock, &tags);
        assert!(done);
        assert!(t.is_finished());
        assert_eq!(t.derived_state_string(), "Exec Failure");
    }

    #[test]
    fn to_value_includes_expected_keys() {
        let clock = SystemClock;
        let mut t = Task::new(&clock);
        let tags = tags();
        t.apply_event(&RemoteEvent::Started, &clock, &tags);
        t.apply_event(&RemoteEvent::Running { pid: 9, rank: 3 }, &clock, &tags);
        t.apply_event(
            &RemoteEvent::Exited {
                status: ExitStatusKind::Code(0),
            },
            &clock,
            &tags,
        );
        t.apply_event(&RemoteEvent::Completed, &clock, &tags);
        let v = t.to_value();
        assert_eq!(v["state"], "Exited");
        assert_eq!(v["rank"], 3);
        assert_eq!(v["pid"], 9);
        assert_eq!(v["code"], 0);
        assert!(v.get("start-time").is_some());
        assert!(v.get("end-time").is_some());
    }
}
