//! C3: the entry engine.
//!
//! A [`CronEntry`] owns one scheduled command: its trigger (C4), its
//! run statistics, its currently active [`Task`] (C2, at most one at a
//! time), and a bounded ring of finished tasks. Grounded on
//! `examples/original_source/src/modules/cron/cron.c`'s
//! `cron_entry_*` functions and `entry.h`'s `struct cron_entry`/
//! `struct cron_stats`.
//!
//! Entries never decide *whether* a scheduled run should be deferred
//! to a sync event — that's the manager's call (C5). An entry only
//! asks its [`SyncGate`] and, if told to defer, registers itself and
//! waits to be dispatched directly via [`CronEntry::run_task`].

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use cron_kernel::{Clock, CronError, RemoteExec, SpawnRequest};
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::task::{Task, TaskLogTags};
use crate::trigger::TriggerKind;

/// Asked by an entry on every scheduling attempt to decide whether the
/// run should happen immediately or be deferred to the next sync
/// event. Implemented by the manager (C5); entries never see the
/// deferred queue directly.
#[async_trait]
pub trait SyncGate: Send + Sync {
    async fn should_defer(&self, now: f64) -> bool;
    async fn enqueue_deferred(&self, entry_id: u64);
}

/// A gate that never defers, for entries created without a configured
/// sync event (the common case, and every test that doesn't exercise
/// `cron.sync`).
pub struct NoopGate;

#[async_trait]
impl SyncGate for NoopGate {
    async fn should_defer(&self, _now: f64) -> bool {
        false
    }
    async fn enqueue_deferred(&self, _entry_id: u64) {}
}

/// Run statistics, matching `struct cron_stats` / `cron_stats_to_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CronStats {
    pub ctime: f64,
    pub starttime: f64,
    pub lastrun: f64,
    pub total: u64,
    pub count: u64,
    pub failcount: u64,
    pub success: u64,
    pub failure: u64,
    pub deferred: u64,
}

impl CronStats {
    fn new(now: f64) -> Self {
        CronStats {
            ctime: now,
            ..Default::default()
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "ctime": self.ctime,
            "starttime": self.starttime,
            "lastrun": self.lastrun,
            "count": self.count,
            "failcount": self.failcount,
            "total": self.total,
            "success": self.success,
            "failure": self.failure,
            "deferred": self.deferred,
        })
    }
}

struct EntryState {
    id: u64,
    name: String,
    command: String,
    cwd: String,
    env: std::collections::HashMap<String, String>,
    rank: i64,
    repeat: i64,
    task_history_count: usize,
    stop_on_failure: i64,
    timeout: f64,
    typename: String,

    stopped: bool,
    destroyed: bool,

    stats: CronStats,
    active_task: Option<Arc<Mutex<Task>>>,
    finished_tasks: VecDeque<Task>,

    trigger: Option<TriggerKind>,
    gate: Arc<dyn SyncGate>,
    remote: Arc<dyn RemoteExec>,
    clock: Arc<dyn Clock>,
}

/// A handle to one cron entry. Cheaply `Clone`-able (it's an `Arc`
/// around the entry's state) so trigger background tasks and the
/// manager can share ownership without a central registry lock.
#[derive(Clone)]
pub struct CronEntry {
    inner: Arc<Mutex<EntryState>>,
}

/// Parameters accepted at entry-creation time, corresponding to the
/// fields `cron_entry_create` unpacks from a `cron.create` request.
pub struct EntryConfig {
    pub name: String,
    pub command: String,
    pub cwd: String,
    pub env: std::collections::HashMap<String, String>,
    pub rank: i64,
    pub repeat: i64,
    pub task_history_count: usize,
    pub stop_on_failure: i64,
    pub timeout: f64,
    pub typename: String,
}

impl CronEntry {
    /// Builds an entry in the (default) stopped state. The caller
    /// (the manager) attaches the trigger with [`CronEntry::attach_trigger`]
    /// and then calls [`CronEntry::start`], mirroring
    /// `cron_entry_create`'s `ops.create` followed by `cron_entry_start`.
    pub fn new(
        id: u64,
        cfg: EntryConfig,
        gate: Arc<dyn SyncGate>,
        remote: Arc<dyn RemoteExec>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        let state = EntryState {
            id,
            name: cfg.name,
            command: cfg.command,
            cwd: cfg.cwd,
            env: cfg.env,
            rank: cfg.rank,
            repeat: cfg.repeat,
            task_history_count: cfg.task_history_count.max(1),
            stop_on_failure: cfg.stop_on_failure,
            timeout: cfg.timeout,
            typename: cfg.typename,
            stopped: true,
            destroyed: false,
            stats: CronStats::new(now),
            active_task: None,
            finished_tasks: VecDeque::new(),
            trigger: None,
            gate,
            remote,
            clock,
        };
        CronEntry {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub async fn id(&self) -> u64 {
        self.inner.lock().await.id
    }

    pub async fn name(&self) -> String {
        self.inner.lock().await.name.clone()
    }

    pub async fn attach_trigger(&self, trigger: TriggerKind) {
        self.inner.lock().await.trigger = Some(trigger);
    }

    /// `cron_entry_start`: (re)starts the trigger watcher and resets
    /// the per-start counters.
    pub async fn start(&self) -> Result<(), CronError> {
        let mut s = self.inner.lock().await;
        if !s.stopped {
            return Err(CronError::Protocol("entry is not stopped".into()));
        }
        if let Some(t) = s.trigger.clone() {
            drop(s);
            t.start().await;
            s = self.inner.lock().await;
        }
        s.stats.starttime = s.clock.now();
        s.stats.count = 0;
        s.stats.failcount = 0;
        s.stopped = false;
        Ok(())
    }

    /// `cron_entry_stop`: stops the trigger watcher, leaving the entry
    /// (and any still-running task) in place.
    pub async fn stop(&self) -> Result<(), CronError> {
        let mut s = self.inner.lock().await;
        if s.stopped {
            return Err(CronError::Protocol("entry already stopped".into()));
        }
        if let Some(t) = s.trigger.clone() {
            drop(s);
            t.stop().await;
            s = self.inner.lock().await;
        }
        s.stopped = true;
        Ok(())
    }

    /// `cron_entry_stop_safe`: stop without racing a trigger callback
    /// that is itself mid-dispatch. `tokio::task::yield_now` stands in
    /// for the original's "wait for the next prepare watcher" trick —
    /// both just push the stop to the next point the runtime is free
    /// to run something else.
    pub async fn stop_safe(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            let _ = this.stop().await;
        });
    }

    pub(crate) async fn repeat_and_count(&self) -> (i64, u64) {
        let s = self.inner.lock().await;
        (s.repeat, s.stats.count)
    }

    pub(crate) async fn last_run(&self) -> f64 {
        self.inner.lock().await.stats.lastrun
    }

    /// Sends `signal` to the currently active task, if any. Used by
    /// `cron.delete` when the caller asks to kill the running command
    /// rather than let it complete on its own.
    pub async fn kill_active(&self, signal: i32) -> Result<(), CronError> {
        let s = self.inner.lock().await;
        let Some(active) = s.active_task.clone() else {
            return Err(CronError::Protocol("entry has no active task".into()));
        };
        let remote = s.remote.clone();
        drop(s);
        active.lock().await.kill(remote.as_ref(), signal).await
    }

    /// `cron_entry_schedule_task`: the entry has decided it *wants* to
    /// run (the trigger fired). Refuses if a task is already active,
    /// bumps run counters, stops the entry early if `repeat` has been
    /// reached, then asks the sync gate whether to dispatch now or
    /// defer.
    pub async fn schedule_task(&self) {
        let (gate, reached_repeat, now) = {
            let mut s = self.inner.lock().await;
            if s.active_task.is_some() {
                info!(entry = s.name, "task still running or scheduled");
                return;
            }
            s.stats.total += 1;
            s.stats.count += 1;
            let reached = s.repeat != 0 && s.stats.count == s.repeat as u64;
            (s.gate.clone(), reached, s.clock.now())
        };
        if reached_repeat {
            let _ = self.stop().await;
        }
        if gate.should_defer(now).await {
            {
                let mut s = self.inner.lock().await;
                s.stats.deferred += 1;
            }
            gate.enqueue_deferred(self.id().await).await;
        } else {
            self.run_task().await;
        }
    }

    /// `cron_entry_run_task`: actually dispatch the command as a
    /// remote subprocess. Called either directly from
    /// [`CronEntry::schedule_task`] or later by the manager when
    /// flushing the deferred queue.
    pub async fn run_task(&self) {
        let (remote, clock, rank, command, cwd, env, timeout, id, name) = {
            let s = self.inner.lock().await;
            (
                s.remote.clone(),
                s.clock.clone(),
                s.rank,
                s.command.clone(),
                s.cwd.clone(),
                s.env.clone(),
                s.timeout,
                s.id,
                s.name.clone(),
            )
        };

        let task = Arc::new(Mutex::new(Task::new(clock.as_ref())));
        {
            let mut t = task.lock().await;
            if timeout >= 0.0 {
                t.set_timeout(timeout);
            }
        }

        let req = SpawnRequest {
            rank,
            command: command.clone(),
            cwd,
            env,
        };
        let tags = TaskLogTags {
            entry_id: id,
            entry_name: name,
            rank,
            command,
        };
        let (finished_tx, finished_rx) = oneshot::channel();

        match Task::run(task.clone(), remote.clone(), clock.clone(), req, tags, finished_tx).await
        {
            Ok(_join) => {
                {
                    let mut s = self.inner.lock().await;
                    s.active_task = Some(task.clone());
                    s.stats.lastrun = s.clock.now();
                }
                let this = self.clone();
                tokio::spawn(async move {
                    let _ = finished_rx.await;
                    this.on_finished(task).await;
                });
            }
            Err(e) => {
                warn!(entry = self.id().await, error = %e, "cron_task_run failed");
            }
        }
    }

    /// `cron_entry_finished_handler`: bookkeeping once a task is
    /// fully done — update success/failure counters, apply the
    /// `stop-on-failure` threshold, push the task onto the finished
    /// ring, and complete a pending destroy if one was requested while
    /// the task was still running.
    async fn on_finished(&self, task: Arc<Mutex<Task>>) {
        let (raw_state, exit_code_nonzero, task_val) = {
            let t = task.lock().await;
            (t.state().to_string(), t.exit_status_nonzero(), t.clone())
        };

        let mut s = self.inner.lock().await;

        if raw_state == "Exec Failure" {
            warn!(entry = s.name, command = s.command, "failed to run command");
            s.stats.failure += 1;
            s.stats.failcount += 1;
        } else if raw_state == "Rexec Failure" {
            warn!(entry = s.name, command = s.command, "failure dispatching command");
            s.stats.failure += 1;
            s.stats.failcount += 1;
        } else if exit_code_nonzero {
            warn!(entry = s.name, command = s.command, state = raw_state, "command failed");
            s.stats.failure += 1;
            s.stats.failcount += 1;
        } else {
            s.stats.success += 1;
        }

        if s.stop_on_failure > 0 && s.stats.failcount >= s.stop_on_failure as u64 {
            drop(s);
            let _ = self.stop().await;
            s = self.inner.lock().await;
        }

        s.finished_tasks.push_front(task_val);
        while s.finished_tasks.len() > s.task_history_count {
            s.finished_tasks.pop_back();
        }
        s.active_task = None;

        let destroyed = s.destroyed;
        drop(s);
        if destroyed {
            self.finalize_destroy().await;
        }
    }

    /// `cron_entry_destroy`: stop the entry, and if no task is active,
    /// tear down immediately; otherwise mark pending and let
    /// [`CronEntry::on_finished`] finish the job once the task completes.
    pub async fn destroy(&self) {
        let _ = self.stop().await;
        let has_active = {
            let mut s = self.inner.lock().await;
            s.destroyed = true;
            s.active_task.is_some()
        };
        if !has_active {
            self.finalize_destroy().await;
        }
    }

    async fn finalize_destroy(&self) {
        let trigger = self.inner.lock().await.trigger.take();
        if let Some(t) = trigger {
            t.destroy().await;
        }
    }

    pub async fn is_destroyed(&self) -> bool {
        self.inner.lock().await.destroyed
    }

    /// `cron_entry_to_json`, minus the containing `entries` array
    /// (C5 adds that wrapper for `cron.list`).
    pub async fn to_value(&self) -> serde_json::Value {
        let s = self.inner.lock().await;
        let mut tasks = Vec::new();
        if let Some(active) = &s.active_task {
            tasks.push(active.lock().await.to_value());
        }
        for t in &s.finished_tasks {
            tasks.push(t.to_value());
        }
        let mut obj = serde_json::json!({
            "id": s.id,
            "rank": s.rank,
            "name": s.name,
            "command": s.command,
            "repeat": s.repeat,
            "stopped": s.stopped,
            "type": s.typename,
            "stats": s.stats.to_value(),
            "tasks": tasks,
        });
        if s.timeout >= 0.0 {
            obj["timeout"] = s.timeout.into();
        }
        if let Some(trigger) = &s.trigger {
            obj["typedata"] = trigger.to_value().await;
        }
        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cron_kernel::SystemClock;
    use cron_runtime::LocalRemoteExec;

    fn entry(task_history_count: usize) -> CronEntry {
        CronEntry::new(
            1,
            EntryConfig {
                name: "t".into(),
                command: "sleep 0.05".into(),
                cwd: "/tmp".into(),
                env: Default::default(),
                rank: 0,
                repeat: 0,
                task_history_count,
                stop_on_failure: 0,
                timeout: -1.0,
                typename: "interval".into(),
            },
            Arc::new(NoopGate),
            Arc::new(LocalRemoteExec::new()),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn schedule_task_is_a_noop_while_a_task_is_already_active() {
        let e = entry(5);
        e.schedule_task().await;
        // The task above takes 50ms; this second attempt lands while it
        // is still active and must not bump the run counters.
        e.schedule_task().await;

        let (_, count) = e.repeat_and_count().await;
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn finished_task_ring_never_exceeds_its_configured_capacity() {
        let e = entry(1);
        for _ in 0..3 {
            e.schedule_task().await;
            tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        }

        let rendered = e.to_value().await;
        let tasks = rendered["tasks"].as_array().unwrap();
        assert!(tasks.len() <= 1);
        assert_eq!(rendered["stats"]["count"], 3);
    }

    #[tokio::test]
    async fn destroy_with_no_active_task_tears_down_immediately() {
        let e = CronEntry::new(
            2,
            EntryConfig {
                name: "idle".into(),
                command: "true".into(),
                cwd: "/tmp".into(),
                env: Default::default(),
                rank: 0,
                repeat: 0,
                task_history_count: 1,
                stop_on_failure: 0,
                timeout: -1.0,
                typename: "interval".into(),
            },
            Arc::new(NoopGate),
            Arc::new(LocalRemoteExec::new()),
            Arc::new(SystemClock),
        );
        e.destroy().await;
        assert!(e.is_destroyed().await);
    }
}
