//! Monitor - polls outstanding batches and retires them
//!
//! Each batch ends exactly once: completed (results written back), failed
//! (service reported failure) or timed out (outstanding past the ceiling).
//! Whichever way it ends, its entry leaves the registry and its row locks
//! are released.

use std::collections::HashMap;

use chrono::Utc;
use futures::StreamExt;

use crate::daemon::ShutdownState;
use crate::domain::{BatchHandle, BatchStatus, ResultOutcome, RunningBatch, WorkItem, WriteBack};
use crate::error::{BatchrError, Result};
use crate::scheduler::manager::BatchManager;

/// Concurrent status checks per poll
const POLL_CONCURRENCY: usize = 8;

/// Result of checking one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFate {
    /// Still outstanding; left in the registry
    Pending,
    Completed,
    Failed(BatchStatus),
    TimedOut,
}

impl BatchFate {
    pub fn is_final(&self) -> bool {
        !matches!(self, BatchFate::Pending)
    }
}

impl BatchManager {
    /// Check every outstanding batch once; returns how many ended.
    pub async fn poll_batches(&self) -> usize {
        let batches = self.running_batches();
        if batches.is_empty() {
            return 0;
        }

        let fates: Vec<BatchFate> = futures::stream::iter(batches)
            .map(|batch| async move {
                if self.shutdown.state() >= ShutdownState::GracefulStop {
                    return BatchFate::Pending;
                }
                self.check_batch(batch).await
            })
            .buffer_unordered(POLL_CONCURRENCY)
            .collect()
            .await;

        fates.iter().filter(|f| f.is_final()).count()
    }

    /// Query one batch and retire it if it has ended.
    pub(crate) async fn check_batch(&self, batch: RunningBatch) -> BatchFate {
        let timed_out = batch.is_timed_out(Utc::now(), self.config.batch_timeout);
        let status = self
            .guarded("status", self.collab.service.status(&batch.handle))
            .await;

        let fate = match status {
            Ok(BatchStatus::Completed) => match self.complete_batch(&batch).await {
                Ok(_) => BatchFate::Completed,
                Err(BatchrError::Cancelled(_)) => BatchFate::Pending,
                Err(e) if timed_out => {
                    tracing::warn!(batch = %batch.handle, error = %e, "Result write-back failed past the ceiling");
                    BatchFate::TimedOut
                }
                Err(e) => {
                    tracing::warn!(batch = %batch.handle, error = %e, "Result write-back failed, retrying next poll");
                    BatchFate::Pending
                }
            },
            Ok(status) if status.is_failure() => {
                tracing::warn!(batch = %batch.handle, source = %batch.source_id, %status, "Batch ended without results");
                BatchFate::Failed(status)
            }
            Ok(_) if timed_out => BatchFate::TimedOut,
            Ok(_) => BatchFate::Pending,
            Err(BatchrError::Cancelled(_)) => BatchFate::Pending,
            Err(e) if timed_out => {
                tracing::warn!(batch = %batch.handle, error = %e, "Status unavailable past the ceiling");
                BatchFate::TimedOut
            }
            Err(e) => {
                tracing::debug!(batch = %batch.handle, error = %e, "Status check failed, retrying next poll");
                BatchFate::Pending
            }
        };

        if fate == BatchFate::TimedOut {
            tracing::warn!(
                batch = %batch.handle,
                source = %batch.source_id,
                elapsed_secs = batch.elapsed(Utc::now()).as_secs(),
                "Batch timed out"
            );
        }
        if fate.is_final() {
            self.finish_batch(&batch.handle, fate).await;
        }
        fate
    }

    /// Fetch results and write successes back; returns rows written.
    async fn complete_batch(&self, batch: &RunningBatch) -> Result<usize> {
        let results = self
            .guarded("fetch_results", self.collab.service.fetch_results(&batch.handle))
            .await?;

        let by_id: HashMap<String, &WorkItem> = batch.items.iter().map(|i| (i.identity.to_string(), i)).collect();
        let mut writes = Vec::new();
        let mut errored = 0;
        for result in results {
            let Some(item) = by_id.get(&result.custom_id) else {
                log::error!(
                    "Invariant violation: batch {} returned unknown result {}",
                    batch.handle,
                    result.custom_id
                );
                continue;
            };
            match result.outcome {
                ResultOutcome::Succeeded { text } => writes.push(WriteBack::result(item.identity.clone(), text)),
                ResultOutcome::Errored { message } => {
                    errored += 1;
                    tracing::debug!(row = %item.identity, error = %message, "Item failed inside batch");
                }
            }
        }

        let missing = batch.items.len().saturating_sub(writes.len() + errored);
        let written = self.write_back(&batch.source_id, writes).await?;
        tracing::info!(
            batch = %batch.handle,
            source = %batch.source_id,
            written,
            errored,
            missing,
            "Batch completed"
        );
        Ok(written)
    }

    /// Remove a batch from the registry, release its rows and persist.
    pub(crate) async fn finish_batch(&self, handle: &BatchHandle, fate: BatchFate) {
        {
            let mut state = self.lock_state();
            let Some(batch) = state.registry.remove(handle) else {
                log::error!("Invariant violation: batch {} already removed", handle);
                return;
            };
            let expected = batch.items.len();
            let released = state.locks.release_all(batch.identities());
            if released != expected {
                log::error!(
                    "Invariant violation: batch {} released {} of {} row locks",
                    handle,
                    released,
                    expected
                );
            }
            match fate {
                BatchFate::Completed => state.stats.completed(),
                BatchFate::Failed(_) => state.stats.failed(),
                BatchFate::TimedOut => state.stats.timed_out(),
                BatchFate::Pending => {}
            }
        }
        self.persist().await;
        self.wake.notify_one();
    }
}
