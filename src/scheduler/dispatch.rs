//! Dispatcher - moves queued work into programmatic resolution and batches
//!
//! Capacity is claimed per batch: a PendingWork reserves one registry slot
//! for each batch it will submit, and AI items that do not fit are put back
//! at the front of the queue. Programmatic items need no slot once their
//! PendingWork has been popped.

use crate::domain::{BatchKind, GenerationRequest, PendingWork, RunningBatch, WorkItem, WriteBack};
use crate::scheduler::manager::{BatchManager, RowLease, SchedulerState};

/// What one popped PendingWork turns into; every item here is locked.
#[derive(Debug)]
struct DispatchPlan {
    source_id: String,
    programmatic: Vec<WorkItem>,
    /// One registry slot is reserved per entry
    batches: Vec<Vec<WorkItem>>,
}

impl BatchManager {
    /// Dispatch queued work while slots remain; returns batches submitted.
    pub async fn dispatch(&self) -> usize {
        let mut submitted = 0;
        loop {
            if !self.shutdown.state().accepts_work() {
                break;
            }
            let plan = {
                let mut state = self.lock_state();
                if state.registry.free_slots() == 0 {
                    break;
                }
                let Some(work) = state.queue.pop() else {
                    break;
                };
                plan_dispatch(&mut state, work, self.config.batch_size)
            };
            submitted += self.execute(plan).await;
        }
        submitted
    }

    async fn execute(&self, plan: DispatchPlan) -> usize {
        if !plan.programmatic.is_empty() {
            self.resolve_programmatic(&plan.source_id, plan.programmatic).await;
        }
        let mut submitted = 0;
        for items in plan.batches {
            if self.submit_batch(&plan.source_id, items).await {
                submitted += 1;
            }
        }
        submitted
    }

    /// Resolve items in-process and write them back in one call.
    async fn resolve_programmatic(&self, source_id: &str, items: Vec<WorkItem>) {
        let _lease = RowLease::new(self, items.iter().map(|i| i.identity.clone()).collect());

        let mut writes = Vec::with_capacity(items.len());
        for item in &items {
            match self.collab.classifier.resolve_programmatic(item) {
                Ok(text) => writes.push(WriteBack::result(item.identity.clone(), text)),
                Err(e) => tracing::warn!(row = %item.identity, error = %e, "Programmatic resolution failed"),
            }
        }

        let resolved = writes.len();
        match self.write_back(source_id, writes).await {
            Ok(written) => {
                self.lock_state().stats.resolved(resolved);
                tracing::info!(source = source_id, items = items.len(), written, "Resolved programmatic items");
            }
            Err(e) => {
                tracing::warn!(source = source_id, error = %e, "Programmatic write-back failed");
            }
        }
    }

    /// Submit one batch against a reserved slot; true if it was registered.
    async fn submit_batch(&self, source_id: &str, items: Vec<WorkItem>) -> bool {
        let lease = RowLease::new(self, items.iter().map(|i| i.identity.clone()).collect());
        let requests: Vec<GenerationRequest> = items.iter().map(GenerationRequest::from_item).collect();

        match self.guarded("submit", self.collab.service.submit(&requests)).await {
            Ok(handle) => {
                let count = items.len();
                let batch = RunningBatch::new(handle.clone(), source_id, items, BatchKind::Ai);
                {
                    let mut state = self.lock_state();
                    state.registry.insert_reserved(batch);
                    state.stats.submitted();
                }
                lease.disarm();
                tracing::info!(batch = %handle, source = source_id, items = count, "Submitted batch");
                self.persist().await;
                true
            }
            Err(e) => {
                {
                    let mut state = self.lock_state();
                    state.registry.unreserve(1);
                    state.stats.submission_failed();
                }
                tracing::warn!(source = source_id, items = items.len(), error = %e, "Batch submission failed, releasing rows");
                false
            }
        }
    }
}

/// Lock, split and reserve capacity for `work` under the state lock.
fn plan_dispatch(state: &mut SchedulerState, work: PendingWork, batch_size: usize) -> DispatchPlan {
    let batch_size = batch_size.max(1);
    let source_id = work.source_id.clone();
    let priority = work.priority;
    let (programmatic, mut ai) = work.partition();

    let programmatic = acquire(state, programmatic);

    let granted = state.registry.reserve(ai.len().div_ceil(batch_size));
    let leftover = ai.split_off((granted * batch_size).min(ai.len()));
    let locked = acquire(state, ai);
    let batches: Vec<Vec<WorkItem>> = locked.chunks(batch_size).map(<[WorkItem]>::to_vec).collect();
    state.registry.unreserve(granted - batches.len());

    if !leftover.is_empty() {
        tracing::debug!(source = %source_id, items = leftover.len(), "No slot for remaining items, requeued");
        state.queue.requeue_front(PendingWork::new(&source_id, leftover, priority));
    }

    DispatchPlan {
        source_id,
        programmatic,
        batches,
    }
}

/// Keep the items whose lock was acquired; raced items are dropped.
fn acquire(state: &mut SchedulerState, items: Vec<WorkItem>) -> Vec<WorkItem> {
    items
        .into_iter()
        .filter(|item| {
            let acquired = state.locks.try_acquire(&item.identity);
            if !acquired {
                tracing::debug!(row = %item.identity, "Row already locked, dropped from dispatch");
            }
            acquired
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ALTERNATE_FIELD, EXPLANATION_FIELD};
    use crate::domain::RowIdentity;
    use crate::scheduler::manager::BatchManagerConfig;
    use crate::scheduler::manager::tests::harness;

    fn ai_items(source: &str, rows: &[&str]) -> Vec<WorkItem> {
        rows.iter().map(|r| WorkItem::new(source, *r)).collect()
    }

    fn see_how(source: &str, row: &str) -> WorkItem {
        WorkItem::new(source, row)
            .with_field(EXPLANATION_FIELD, "see how 1:1")
            .with_field(ALTERNATE_FIELD, "alt")
    }

    #[tokio::test]
    async fn test_three_items_capacity_one_batch_size_two() {
        let config = BatchManagerConfig::default()
            .with_max_concurrent_batches(1)
            .with_batch_size(2);
        let h = harness(config, &["a"]);
        h.source.add_items(ai_items("a", &["1", "2", "3"]));

        h.manager.scan_all().await;
        assert_eq!(h.manager.dispatch().await, 1);

        let submitted = h.service.submitted();
        assert_eq!(submitted.len(), 1);
        let ids: Vec<&str> = submitted[0].iter().map(|r| r.custom_id.as_str()).collect();
        assert_eq!(ids, vec!["a:1", "a:2"]);

        let status = h.manager.status();
        assert_eq!(status.running_batch_count, 1);
        assert_eq!(status.queue_depth, 1);
        assert_eq!(status.queued_items, 1);
        assert_eq!(status.locked_row_count, 2);
        assert!(!h.manager.is_row_locked(&RowIdentity::new("a", "3")));
    }

    #[tokio::test]
    async fn test_splits_into_multiple_batches() {
        let config = BatchManagerConfig::default()
            .with_max_concurrent_batches(5)
            .with_batch_size(2);
        let h = harness(config, &["a"]);
        h.source.add_items(ai_items("a", &["1", "2", "3", "4", "5"]));

        h.manager.scan_all().await;
        assert_eq!(h.manager.dispatch().await, 3);

        let sizes: Vec<usize> = h.service.submitted().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        let status = h.manager.status();
        assert_eq!(status.free_slots, 2);
        assert_eq!(status.locked_row_count, 5);
        assert_eq!(status.stats.batches_submitted, 3);
    }

    #[tokio::test]
    async fn test_programmatic_items_resolved_and_released() {
        let h = harness(BatchManagerConfig::default(), &["a"]);
        h.source.add_items(vec![see_how("a", "1"), WorkItem::new("a", "2")]);

        h.manager.scan_all().await;
        h.manager.dispatch().await;

        let writes = h.source.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].identity, RowIdentity::new("a", "1"));
        assert!(writes[0].text().unwrap().starts_with("See how"));
        assert!(!h.manager.is_row_locked(&RowIdentity::new("a", "1")));
        assert!(h.manager.is_row_locked(&RowIdentity::new("a", "2")));

        let stats = h.manager.status().stats;
        assert_eq!(stats.programmatic_resolved, 1);
        assert_eq!(stats.rows_written, 1);
    }

    #[tokio::test]
    async fn test_programmatic_write_failure_releases_locks() {
        let h = harness(BatchManagerConfig::default(), &["a"]);
        h.source.add_items(vec![see_how("a", "1")]);
        h.source.set_fail_writes(true);

        h.manager.scan_all().await;
        h.manager.dispatch().await;

        assert_eq!(h.manager.status().locked_row_count, 0);
        assert_eq!(h.manager.status().stats.programmatic_resolved, 0);
    }

    #[tokio::test]
    async fn test_submission_failure_releases_batch_locks() {
        let h = harness(BatchManagerConfig::default(), &["a"]);
        h.source.add_items(ai_items("a", &["1", "2"]));
        h.service.set_fail_submit(true);

        h.manager.scan_all().await;
        assert_eq!(h.manager.dispatch().await, 0);

        let status = h.manager.status();
        assert_eq!(status.locked_row_count, 0);
        assert_eq!(status.running_batch_count, 0);
        assert_eq!(status.free_slots, 5);
        assert_eq!(status.stats.submission_failures, 1);
    }

    #[tokio::test]
    async fn test_no_dispatch_when_full() {
        let config = BatchManagerConfig::default().with_max_concurrent_batches(1);
        let h = harness(config, &["a", "b"]);
        h.source.add_items(ai_items("a", &["1"]));
        h.source.add_items(ai_items("b", &["1"]));

        h.manager.scan_all().await;
        assert_eq!(h.manager.dispatch().await, 1);
        assert_eq!(h.manager.dispatch().await, 0);
        assert_eq!(h.manager.status().queue_depth, 1);
    }

    #[tokio::test]
    async fn test_no_dispatch_after_soft_stop() {
        let h = harness(BatchManagerConfig::default(), &["a"]);
        h.source.add_items(ai_items("a", &["1"]));
        h.manager.scan_all().await;
        h.manager.request_stop();

        assert_eq!(h.manager.dispatch().await, 0);
        assert!(h.service.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_submission_persists_snapshot() {
        let h = harness(BatchManagerConfig::default(), &["a"]);
        h.source.add_items(ai_items("a", &["1"]));
        h.manager.scan_all().await;
        h.manager.dispatch().await;

        let snapshot = h.manager.store().load().unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_plan_drops_raced_items() {
        let h = harness(BatchManagerConfig::default().with_batch_size(2), &["a"]);
        let mut state = h.manager.lock_state();
        state.locks.try_acquire(&RowIdentity::new("a", "2"));

        let work = PendingWork::new("a", ai_items("a", &["1", "2", "3"]), 0);
        let plan = plan_dispatch(&mut state, work, 2);

        let rows: Vec<Vec<&str>> = plan
            .batches
            .iter()
            .map(|b| b.iter().map(|i| i.identity.row_id.as_str()).collect())
            .collect();
        assert_eq!(rows, vec![vec!["1", "3"]]);
        assert_eq!(state.registry.reserved(), 1);
        assert!(state.queue.is_empty());
    }
}
