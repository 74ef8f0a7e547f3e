//! Scanner - turns pending source rows into queued PendingWork
//!
//! A source is skipped while it is backed off or already has work queued.
//! Errors never escape a scan: a permission failure backs the source off,
//! anything else abandons that source until the next cycle.

use std::collections::BTreeSet;

use crate::domain::{PendingWork, WorkItem};
use crate::error::Result;
use crate::scheduler::manager::{BatchManager, SourceSpec};

impl BatchManager {
    /// Scan every eligible source once; returns how many sources were queued.
    pub async fn scan_all(&self) -> usize {
        self.lock_state().stats.scanned();

        let mut queued = 0;
        for spec in &self.sources {
            if !self.shutdown.state().accepts_work() {
                break;
            }
            {
                let mut state = self.lock_state();
                if state.backoff.is_blocked(&spec.id) {
                    tracing::debug!(source = %spec.id, "Source backed off, skipping");
                    continue;
                }
                if state.queue.has_source(&spec.id) {
                    tracing::debug!(source = %spec.id, "Work already queued, skipping");
                    continue;
                }
            }

            match self.scan_source(spec).await {
                Ok(Some(work)) => {
                    let items = work.len();
                    let mut state = self.lock_state();
                    if self.shutdown.state().accepts_work() && state.queue.push(work) {
                        queued += 1;
                        tracing::info!(source = %spec.id, items, "Queued pending work");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    self.note_source_error(&spec.id, &e);
                }
            }
        }
        queued
    }

    /// Fetch, cache, filter and classify one source's pending items.
    async fn scan_source(&self, spec: &SourceSpec) -> Result<Option<PendingWork>> {
        let items = self
            .guarded("list_pending", self.collab.source.list_pending(&spec.id))
            .await?;
        if items.is_empty() {
            return Ok(None);
        }

        let keys: BTreeSet<String> = items.iter().filter_map(|i| i.context_key.clone()).collect();
        for key in &keys {
            let cached = self
                .guarded(
                    "ensure_cached",
                    self.collab.cache.ensure_cached(self.collab.source.as_ref(), &spec.id, key),
                )
                .await;
            if let Err(e) = cached {
                if e.is_permission() {
                    return Err(e);
                }
                tracing::warn!(source = %spec.id, key = %key, error = %e, "Context cache refresh failed");
            }
        }

        let fresh: Vec<WorkItem> = {
            let state = self.lock_state();
            items
                .into_iter()
                .filter(|item| {
                    if item.source_id() != spec.id {
                        log::error!("Invariant violation: {} listed under source {}", item.identity, spec.id);
                        return false;
                    }
                    !state.locks.is_held(&item.identity)
                })
                .collect()
        };
        if fresh.is_empty() {
            return Ok(None);
        }

        let classified: Vec<WorkItem> = fresh
            .into_iter()
            .map(|item| {
                let mode = self.collab.classifier.classify(&item);
                item.with_mode(mode)
            })
            .collect();
        Ok(Some(PendingWork::new(&spec.id, classified, spec.priority)))
    }
}
