//! C5: the manager.
//!
//! Owns the entry table, allocates entry ids, and implements
//! [`SyncGate`] on behalf of every entry it creates: a sync event
//! ties run dispatch to an external topic rather than to each
//! entry's own trigger firing. Grounded on
//! `examples/original_source/src/modules/cron/cron.c`'s `struct
//! cron_ctx`, `cron_entry_defer`, `deferred_cb`, and the five
//! `cron_*_handler` functions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cron_kernel::{Clock, CronError, EventBus, RemoteExec};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::entry::{CronEntry, EntryConfig, SyncGate};
use crate::serialize::{parse_trigger_args, CreateRequest, SyncResponse};

/// The default `task-history-count`/`rank`/`repeat`/`stop-on-failure`
/// a `cron.create` request may omit, matching `cron_entry_create`'s
/// defaults.
pub struct CreateDefaults;

impl CreateDefaults {
    pub const REPEAT: i64 = 0;
    pub const RANK: i64 = 0;
    pub const TASK_HISTORY_COUNT: usize = 1;
    pub const STOP_ON_FAILURE: i64 = 0;
    pub const TIMEOUT: f64 = -1.0;
}

struct SyncState {
    topic: Option<String>,
    epsilon: f64,
    last_sync: f64,
    /// Entries awaiting the next sync event, drained in the order
    /// they were deferred (§5: "the deferred queue is FIFO").
    deferred: VecDeque<u64>,
    listener: Option<JoinHandle<()>>,
}

/// `cron_ctx_create` sets `sync_epsilon = 0.015` unconditionally,
/// before any module args are parsed; a `cron.sync` request or a
/// `sync_epsilon=` module arg can override it afterward.
const DEFAULT_SYNC_EPSILON: f64 = 0.015;

impl SyncState {
    fn new() -> Self {
        SyncState {
            topic: None,
            epsilon: DEFAULT_SYNC_EPSILON,
            last_sync: 0.0,
            deferred: VecDeque::new(),
            listener: None,
        }
    }
}

struct ManagerState {
    entries: RwLock<HashMap<u64, CronEntry>>,
    next_id: AtomicU64,
    cwd: String,
    remote: Arc<dyn RemoteExec>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    sync: Mutex<SyncState>,
}

/// Implements [`SyncGate`] over a manager's sync state. Entries hold
/// a clone of this (as `Arc<dyn SyncGate>`), never the manager's
/// `entries` table itself.
struct ManagerGate {
    state: Arc<ManagerState>,
}

#[async_trait]
impl SyncGate for ManagerGate {
    /// `cron_entry_defer`'s decision of whether to defer at all: no
    /// sync event configured, or the time since the last one is
    /// shorter than `sync_epsilon`, means run now instead.
    async fn should_defer(&self, now: f64) -> bool {
        let sync = self.state.sync.lock().await;
        sync.topic.is_some() && (now - sync.last_sync) >= sync.epsilon
    }

    async fn enqueue_deferred(&self, entry_id: u64) {
        let mut sync = self.state.sync.lock().await;
        sync.deferred.push_back(entry_id);
        debug!(entry = entry_id, topic = ?sync.topic, "deferring to next sync event");
    }
}

/// The cron manager: holds every live entry and exposes the
/// `cron.create`/`cron.delete`/`cron.list`/`cron.start`/`cron.stop`/
/// `cron.sync` operations `cron-cli`'s `serve` subcommand dispatches
/// to.
#[derive(Clone)]
pub struct Manager {
    state: Arc<ManagerState>,
}

impl Manager {
    pub fn new(cwd: String, remote: Arc<dyn RemoteExec>, bus: Arc<dyn EventBus>, clock: Arc<dyn Clock>) -> Self {
        Manager {
            state: Arc::new(ManagerState {
                entries: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                cwd,
                remote,
                bus,
                clock,
                sync: Mutex::new(SyncState::new()),
            }),
        }
    }

    fn gate(&self) -> Arc<dyn SyncGate> {
        Arc::new(ManagerGate {
            state: self.state.clone(),
        })
    }

    /// `cron.create`: allocates a new entry, attaches its trigger, and
    /// starts its watcher. Returns the rendered entry.
    pub async fn create(&self, req: CreateRequest) -> Result<serde_json::Value, CronError> {
        let trigger_args = parse_trigger_args(&req.kind, &req.args)?;
        if req.repeat.is_some_and(|r| r < 0) {
            return Err(CronError::Protocol("repeat must not be negative".into()));
        }

        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        let cfg = EntryConfig {
            name: req.name,
            command: req.command,
            cwd: req.cwd.unwrap_or_else(|| self.state.cwd.clone()),
            env: req.environ.unwrap_or_default(),
            rank: req.rank.unwrap_or(CreateDefaults::RANK),
            repeat: req.repeat.unwrap_or(CreateDefaults::REPEAT),
            task_history_count: req
                .task_history_count
                .map(|n| n.max(1) as usize)
                .unwrap_or(CreateDefaults::TASK_HISTORY_COUNT),
            stop_on_failure: req.stop_on_failure.unwrap_or(CreateDefaults::STOP_ON_FAILURE),
            timeout: req.timeout.unwrap_or(CreateDefaults::TIMEOUT),
            typename: req.kind.clone(),
        };

        let entry = CronEntry::new(id, cfg, self.gate(), self.state.remote.clone(), self.state.clock.clone());

        let trigger = crate::trigger::create(
            &req.kind,
            trigger_args,
            entry.clone(),
            self.state.clock.clone(),
            self.state.bus.clone(),
        )
        .await?;
        entry.attach_trigger(trigger).await;
        entry.start().await?;

        self.state.entries.write().await.insert(id, entry.clone());
        info!(id, kind = req.kind, "created cron entry");
        Ok(entry.to_value().await)
    }

    async fn find(&self, id: u64) -> Result<CronEntry, CronError> {
        self.state
            .entries
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CronError::NotFound(format!("cron entry {id}")))
    }

    /// `cron.delete`: removes an entry, optionally sending SIGTERM to
    /// its active task first. Returns the entry's rendering as it was
    /// just before removal.
    pub async fn delete(&self, id: u64, kill: bool) -> Result<serde_json::Value, CronError> {
        let entry = self.find(id).await?;
        let rendered = entry.to_value().await;
        if kill {
            let _ = entry.kill_active(15).await;
        }
        entry.destroy().await;
        self.state.entries.write().await.remove(&id);
        Ok(rendered)
    }

    /// `cron.stop`: stops an entry's trigger without removing it.
    pub async fn stop(&self, id: u64) -> Result<serde_json::Value, CronError> {
        let entry = self.find(id).await?;
        entry.stop().await?;
        Ok(entry.to_value().await)
    }

    /// `cron.start`: (re)starts a stopped entry's trigger.
    pub async fn start(&self, id: u64) -> Result<serde_json::Value, CronError> {
        let entry = self.find(id).await?;
        entry.start().await?;
        Ok(entry.to_value().await)
    }

    /// `cron.list`: renders every live entry.
    pub async fn list(&self) -> Vec<serde_json::Value> {
        let entries = self.state.entries.read().await;
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries.values() {
            out.push(entry.to_value().await);
        }
        out
    }

    /// `cron.sync`: (re)configures, or disables, the sync event that
    /// gates deferred dispatch. Mirrors `cron_sync_handler`'s exact
    /// sequencing: stop any existing sync subscription first, install
    /// the new one if a topic was given, then flush anything still
    /// deferred if a previously active sync event was just disabled
    /// (those entries can now never be woken by a sync event again).
    pub async fn sync(
        &self,
        topic: Option<String>,
        disable: bool,
        sync_epsilon: Option<f64>,
    ) -> Result<SyncResponse, CronError> {
        let sync_event_before = { self.state.sync.lock().await.topic.clone() };

        if topic.is_some() || disable {
            self.stop_sync_listener().await;
        }
        if let Some(topic) = topic.clone() {
            self.start_sync_listener(topic).await?;
        }
        if let Some(epsilon) = sync_epsilon {
            self.state.sync.lock().await.epsilon = epsilon;
        }

        let now_topic = { self.state.sync.lock().await.topic.clone() };
        if let Some(t) = now_topic {
            let epsilon = self.state.sync.lock().await.epsilon;
            Ok(SyncResponse::Enabled {
                sync_event: t,
                sync_epsilon: epsilon,
            })
        } else {
            if sync_event_before.is_some() {
                self.flush_deferred().await;
            }
            Ok(SyncResponse::Disabled {
                sync_disabled: true,
            })
        }
    }

    async fn stop_sync_listener(&self) {
        let mut sync = self.state.sync.lock().await;
        if let Some(handle) = sync.listener.take() {
            handle.abort();
        }
        sync.topic = None;
    }

    async fn start_sync_listener(&self, topic: String) -> Result<(), CronError> {
        let sub = self.state.bus.subscribe(&topic).await?;
        let mut receiver = sub.receiver;
        let topic_match = topic.clone();
        let state = self.state.clone();

        let handle = tokio::spawn(async move {
            loop {
                let msg = match receiver.recv().await {
                    Ok(m) => m,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if msg.topic != topic_match {
                    continue;
                }
                Self::flush_state(&state).await;
            }
        });

        let mut sync = self.state.sync.lock().await;
        sync.topic = Some(topic);
        sync.listener = Some(handle);
        Ok(())
    }

    /// `deferred_cb`: pop everything waiting and run it directly,
    /// bypassing the gate (these entries already paid the defer
    /// cost). `last_sync` only advances here — on a sync event that
    /// found nothing deferred, the original's handler was never even
    /// running, so it never touched `last_sync` either.
    async fn flush_state(state: &Arc<ManagerState>) {
        let ids: Vec<u64> = {
            let mut sync = state.sync.lock().await;
            if sync.deferred.is_empty() {
                return;
            }
            let ids = sync.deferred.drain(..).collect();
            sync.last_sync = state.clock.now();
            ids
        };
        let entries = state.entries.read().await;
        for id in ids {
            if let Some(entry) = entries.get(&id) {
                entry.run_task().await;
            }
        }
    }

    async fn flush_deferred(&self) {
        Self::flush_state(&self.state).await;
    }
}

/// Rendered `{"entries": [...]}"` response for `cron.list`, matching
/// `cron_ls_handler`'s top-level object.
pub async fn list_response(manager: &Manager) -> serde_json::Value {
    crate::serialize::list_response(manager.list().await)
}
