//! Batch Manager - shared scheduler state and its control surface.
//!
//! The BatchManager owns the row lock set, work queue, backoff table and
//! batch registry behind a single mutex. Collaborator I/O never happens
//! while that mutex is held: every call goes through `guarded`, which adds
//! a per-call timeout and aborts on ForceStop.
//!
//! Scanning, dispatch and monitoring live in sibling modules as further
//! `impl BatchManager` blocks; the loops that drive them are in `daemon`.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;

use crate::cache::ContextCache;
use crate::classify::ItemClassifier;
use crate::daemon::{ShutdownController, ShutdownState};
use crate::domain::{RowIdentity, RunningBatch, WriteBack};
use crate::error::{BatchrError, Result};
use crate::scheduler::backoff::BackoffTable;
use crate::scheduler::locks::RowLockSet;
use crate::scheduler::queue::WorkQueue;
use crate::scheduler::registry::BatchRegistry;
use crate::scheduler::stats::SessionStats;
use crate::service::SubmissionService;
use crate::source::WorkSource;
use crate::storage::{BatchSnapshot, BatchStore};

/// Runtime configuration for the BatchManager.
#[derive(Debug, Clone)]
pub struct BatchManagerConfig {
    /// Names the persisted snapshot.
    pub instance: String,
    pub max_concurrent_batches: usize,
    /// Max items per submitted batch.
    pub batch_size: usize,
    /// Ceiling after which an outstanding batch counts as failed.
    pub batch_timeout: Duration,
    pub scan_interval: Duration,
    pub poll_interval: Duration,
    /// How long a source is skipped after a permission failure.
    pub permission_block: Duration,
    /// Bound on GracefulStop before ForceStop.
    pub graceful_timeout: Duration,
    /// Timeout for each collaborator call.
    pub request_timeout: Duration,
    /// Log write-backs instead of performing them.
    pub dry_run: bool,
}

impl Default for BatchManagerConfig {
    fn default() -> Self {
        Self {
            instance: "default".to_string(),
            max_concurrent_batches: 5,
            batch_size: 2,
            batch_timeout: Duration::from_secs(3600),
            scan_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(30),
            permission_block: Duration::from_secs(3600),
            graceful_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            dry_run: false,
        }
    }
}

impl BatchManagerConfig {
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn with_max_concurrent_batches(mut self, max: usize) -> Self {
        self.max_concurrent_batches = max;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_permission_block(mut self, duration: Duration) -> Self {
        self.permission_block = duration;
        self
    }

    pub fn with_graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// External systems the scheduler talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn WorkSource>,
    pub service: Arc<dyn SubmissionService>,
    pub cache: Arc<dyn ContextCache>,
    pub classifier: Arc<dyn ItemClassifier>,
}

/// A configured source and its dispatch priority (lower first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub id: String,
    pub priority: i32,
}

impl SourceSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A source currently skipped because of a permission failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedSource {
    pub source_id: String,
    pub remaining_secs: u64,
    pub reason: String,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: ShutdownState,
    pub running_batch_count: usize,
    pub max_concurrent_batches: usize,
    pub free_slots: usize,
    pub queue_depth: usize,
    pub queued_items: usize,
    pub locked_row_count: usize,
    pub blocked_sources: Vec<BlockedSource>,
    pub stats: SessionStats,
}

/// Bookkeeping guarded by the manager's single mutex.
#[derive(Debug)]
pub(crate) struct SchedulerState {
    pub(crate) locks: RowLockSet,
    pub(crate) backoff: BackoffTable,
    pub(crate) queue: WorkQueue,
    pub(crate) registry: BatchRegistry,
    pub(crate) stats: SessionStats,
    /// Set once the scan loop has exited
    pub(crate) scanning_done: bool,
}

/// The continuous batch scheduler.
pub struct BatchManager {
    pub(crate) config: BatchManagerConfig,
    pub(crate) sources: Vec<SourceSpec>,
    pub(crate) collab: Collaborators,
    state: Mutex<SchedulerState>,
    store: BatchStore,
    persist_guard: tokio::sync::Mutex<()>,
    pub(crate) shutdown: ShutdownController,
    /// Wakes the monitor loop when the registry or scan state changes
    pub(crate) wake: Notify,
}

impl BatchManager {
    pub fn new(config: BatchManagerConfig, sources: Vec<SourceSpec>, collab: Collaborators, store: BatchStore) -> Self {
        let state = SchedulerState {
            locks: RowLockSet::new(),
            backoff: BackoffTable::new(),
            queue: WorkQueue::new(),
            registry: BatchRegistry::new(config.max_concurrent_batches),
            stats: SessionStats::new(),
            scanning_done: false,
        };
        Self {
            config,
            sources,
            collab,
            state: Mutex::new(state),
            store,
            persist_guard: tokio::sync::Mutex::new(()),
            shutdown: ShutdownController::new(),
            wake: Notify::new(),
        }
    }

    /// Convenience for callers that drive the loops.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn config(&self) -> &BatchManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &BatchStore {
        &self.store
    }

    pub fn shutdown(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Advance the shutdown state one step.
    pub fn request_stop(&self) -> ShutdownState {
        let state = self.shutdown.request_stop();
        self.wake.notify_one();
        state
    }

    /// Never held across an await.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> SchedulerStatus {
        let mut state = self.lock_state();
        state.backoff.prune_expired();
        SchedulerStatus {
            state: self.shutdown.state(),
            running_batch_count: state.registry.len(),
            max_concurrent_batches: state.registry.capacity(),
            free_slots: state.registry.free_slots(),
            queue_depth: state.queue.len(),
            queued_items: state.queue.item_count(),
            locked_row_count: state.locks.len(),
            blocked_sources: state
                .backoff
                .blocked_sources()
                .into_iter()
                .map(|(source_id, remaining, reason)| BlockedSource {
                    source_id,
                    remaining_secs: remaining.as_secs(),
                    reason,
                })
                .collect(),
            stats: state.stats.clone(),
        }
    }

    /// Copy of the outstanding batches.
    pub fn running_batches(&self) -> Vec<RunningBatch> {
        self.lock_state().registry.snapshot()
    }

    pub fn is_row_locked(&self, identity: &RowIdentity) -> bool {
        self.lock_state().locks.is_held(identity)
    }

    pub fn is_source_blocked(&self, source_id: &str) -> bool {
        self.lock_state().backoff.is_blocked(source_id)
    }

    /// Run a collaborator call with the request timeout, abandoning it on ForceStop.
    pub(crate) async fn guarded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let force = self.shutdown.force_token();
        let timeout = self.config.request_timeout;
        tokio::select! {
            biased;
            _ = force.cancelled() => Err(BatchrError::Cancelled(op.to_string())),
            result = tokio::time::timeout(timeout, fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(BatchrError::Timeout(format!("{} exceeded {:?}", op, timeout))),
            },
        }
    }

    /// Back the source off if `err` is authorization-class; true if it was.
    pub(crate) fn note_source_error(&self, source_id: &str, err: &BatchrError) -> bool {
        if err.is_permission() {
            self.lock_state()
                .backoff
                .block(source_id, self.config.permission_block, err.to_string());
            true
        } else {
            tracing::warn!(source = source_id, error = %err, "Source call failed, retrying next cycle");
            false
        }
    }

    /// Write results back to a source in one bulk call.
    pub(crate) async fn write_back(&self, source_id: &str, writes: Vec<WriteBack>) -> Result<usize> {
        if writes.is_empty() {
            return Ok(0);
        }
        let count = writes.len();
        if self.config.dry_run {
            for write in &writes {
                tracing::info!(
                    source = source_id,
                    row = %write.identity,
                    text = write.text().unwrap_or_default(),
                    "Dry run, skipping write"
                );
            }
            return Ok(count);
        }

        let result = self
            .guarded("write_back", self.collab.source.write_back(source_id, &writes))
            .await;
        match result {
            Ok(()) => {
                self.lock_state().stats.written(count);
                Ok(count)
            }
            Err(e) => {
                self.note_source_error(source_id, &e);
                Err(e)
            }
        }
    }

    /// Save the registry snapshot; failures are logged, never fatal.
    pub(crate) async fn persist(&self) {
        let _guard = self.persist_guard.lock().await;
        let snapshot = {
            let state = self.lock_state();
            BatchSnapshot::new(&self.config.instance, state.registry.snapshot())
        };
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("Failed to persist registry snapshot: {}", e),
            Err(e) => log::error!("Snapshot save task failed: {}", e),
        }
    }
}

impl std::fmt::Debug for BatchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchManager")
            .field("config", &self.config)
            .field("sources", &self.sources)
            .field("state", &self.shutdown.state())
            .finish_non_exhaustive()
    }
}

/// Releases row locks on drop unless disarmed.
///
/// Every path that claims rows holds one of these until a registry entry
/// takes over ownership, so early returns and cancelled futures still
/// release.
pub(crate) struct RowLease<'a> {
    manager: &'a BatchManager,
    identities: Vec<RowIdentity>,
    armed: bool,
}

impl<'a> RowLease<'a> {
    pub(crate) fn new(manager: &'a BatchManager, identities: Vec<RowIdentity>) -> Self {
        Self {
            manager,
            identities,
            armed: true,
        }
    }

    /// Hand ownership of the locks to a registry entry.
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RowLease<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let released = self.manager.lock_state().locks.release_all(&self.identities);
        if released != self.identities.len() {
            log::error!(
                "Invariant violation: released {} of {} row locks",
                released,
                self.identities.len()
            );
        }
    }
}
