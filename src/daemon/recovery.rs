//! Crash Recovery - reconciles batches persisted by an earlier process
//!
//! On start the persisted registry snapshot is loaded and every batch in it
//! is re-registered with its rows locked, then checked once against the
//! submission service:
//! - Completed batches go through the normal result write-back path
//! - Failed, cancelled, expired or timed-out batches are discarded
//! - Batches still processing stay registered for the monitor

use serde::Serialize;

use crate::error::{BatchrError, Result};
use crate::scheduler::{BatchFate, BatchManager};

/// What recovery did with one persisted batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Still processing; left for the monitor
    Resumed { handle: String },
    /// Results written back and batch retired
    Completed { handle: String },
    /// Ended without results (or timed out); rows released
    Discarded { handle: String },
    /// Already registered in this process
    Skipped { handle: String },
}

/// Summary of a recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub resumed: usize,
    pub completed: usize,
    pub discarded: usize,
    pub skipped: usize,
}

impl RecoveryReport {
    fn record(&mut self, action: &RecoveryAction) {
        match action {
            RecoveryAction::Resumed { .. } => self.resumed += 1,
            RecoveryAction::Completed { .. } => self.completed += 1,
            RecoveryAction::Discarded { .. } => self.discarded += 1,
            RecoveryAction::Skipped { .. } => self.skipped += 1,
        }
    }

    /// Batches found in the snapshot
    pub fn total(&self) -> usize {
        self.resumed + self.completed + self.discarded + self.skipped
    }
}

impl BatchManager {
    /// Reconcile the persisted snapshot with the submission service.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let store = self.store().clone();
        let snapshot = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| BatchrError::Storage(format!("Snapshot load task failed: {}", e)))??;

        let mut report = RecoveryReport::default();
        if snapshot.is_empty() {
            log::debug!("No persisted batches to recover");
            return Ok(report);
        }
        log::info!(
            "Recovering {} batches saved at {}",
            snapshot.len(),
            snapshot.saved_at
        );

        let mut registered = Vec::new();
        {
            let mut state = self.lock_state();
            for batch in snapshot.batches.into_values() {
                if state.registry.contains(&batch.handle) {
                    report.record(&RecoveryAction::Skipped {
                        handle: batch.handle.to_string(),
                    });
                    continue;
                }
                for identity in batch.identities() {
                    if !state.locks.try_acquire(identity) {
                        log::error!(
                            "Invariant violation: recovered batch {} shares row {} with another batch",
                            batch.handle,
                            identity
                        );
                    }
                }
                registered.push(batch.clone());
                state.registry.insert(batch);
            }
        }

        for batch in registered {
            let handle = batch.handle.to_string();
            let action = match self.check_batch(batch).await {
                BatchFate::Pending => RecoveryAction::Resumed { handle },
                BatchFate::Completed => RecoveryAction::Completed { handle },
                BatchFate::Failed(_) | BatchFate::TimedOut => RecoveryAction::Discarded { handle },
            };
            log::info!("Recovery: {:?}", action);
            report.record(&action);
        }

        self.persist().await;
        Ok(report)
    }
}
