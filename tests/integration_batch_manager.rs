//! End-to-end scheduling tests
//!
//! Drives the BatchManager against the in-memory doubles and a TSV source,
//! checking that every pending row is written back exactly once.

mod common;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use batchr::cache::FsContextCache;
use batchr::classify::RuleClassifier;
use batchr::daemon::StopReason;
use batchr::domain::{RowIdentity, STATUS_DONE};
use batchr::scheduler::{BatchManager, Collaborators, SourceSpec};
use batchr::service::MockSubmissionService;
use batchr::source::TsvWorkSource;
use batchr::storage::BatchStore;
use common::{Fixture, fast, rows, see_how, wait_until};
use tempfile::TempDir;

#[tokio::test]
async fn test_run_once_writes_every_row_exactly_once() {
    let fixture = Fixture::with_service(MockSubmissionService::new().with_auto_complete());
    fixture.source.add_items(rows("alice", 1..=7));
    fixture.source.add_items(rows("bob", 1..=4));
    let config = fast().with_max_concurrent_batches(2).with_batch_size(3);
    let manager = fixture.manager(config, &["alice", "bob"]);

    let reason = tokio::time::timeout(Duration::from_secs(5), manager.clone().run_once())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reason, StopReason::Drained);

    let writes = fixture.source.writes();
    assert_eq!(writes.len(), 11);
    let unique: HashSet<&RowIdentity> = writes.iter().map(|w| &w.identity).collect();
    assert_eq!(unique.len(), 11);
    assert_eq!(fixture.source.pending_count("alice"), 0);
    assert_eq!(fixture.source.pending_count("bob"), 0);

    let status = manager.status();
    assert_eq!(status.locked_row_count, 0);
    assert_eq!(status.running_batch_count, 0);
    assert_eq!(status.stats.rows_written, 11);
    assert!(fixture.store(manager.config()).load().unwrap().is_empty());
}

#[tokio::test]
async fn test_no_row_submitted_twice_while_outstanding() {
    let fixture = Fixture::new();
    fixture.source.add_items(rows("alice", 1..=6));
    let config = fast().with_max_concurrent_batches(2).with_batch_size(2);
    let manager = fixture.manager(config, &["alice"]);

    for _ in 0..5 {
        manager.scan_all().await;
        manager.dispatch().await;
        manager.poll_batches().await;
    }

    let submitted = fixture.service.submitted();
    assert_eq!(submitted.len(), 2);
    let ids: Vec<String> = submitted.iter().flatten().map(|r| r.custom_id.clone()).collect();
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), unique.len());

    let status = manager.status();
    assert_eq!(status.running_batch_count, 2);
    assert_eq!(status.free_slots, 0);
    assert_eq!(status.locked_row_count, 4);
    assert_eq!(status.queue_depth, 1);
    assert_eq!(status.queued_items, 2);
}

#[tokio::test]
async fn test_freed_slot_picks_up_queued_work() {
    let fixture = Fixture::new();
    fixture.source.add_items(rows("alice", 1..=3));
    let config = fast().with_max_concurrent_batches(1).with_batch_size(2);
    let manager = fixture.manager(config, &["alice"]);

    manager.scan_all().await;
    assert_eq!(manager.dispatch().await, 1);
    assert!(!manager.is_row_locked(&RowIdentity::new("alice", "3")));

    fixture.service.complete_all();
    assert_eq!(manager.poll_batches().await, 1);
    assert_eq!(manager.dispatch().await, 1);

    let submitted = fixture.service.submitted();
    assert_eq!(submitted[1][0].custom_id, "alice:3");
    assert!(manager.is_row_locked(&RowIdentity::new("alice", "3")));
}

#[tokio::test]
async fn test_programmatic_and_ai_items_both_written() {
    let fixture = Fixture::with_service(MockSubmissionService::new().with_auto_complete());
    fixture.source.add_items(vec![
        see_how("alice", "1", "3:16", "so loved / loved so much"),
        see_how("alice", "2", "1:1", ""),
    ]);
    fixture.source.add_items(rows("alice", 3..=4));
    let manager = fixture.manager(fast().with_batch_size(3), &["alice"]);

    manager.clone().run_once().await.unwrap();

    let writes: BTreeMap<String, String> = fixture
        .source
        .writes()
        .into_iter()
        .map(|w| (w.identity.to_string(), w.text().unwrap_or_default().to_string()))
        .collect();
    assert_eq!(writes.len(), 4);
    assert_eq!(
        writes["alice:1"],
        "See how you translated the similar expression in [3:16](../03/16.md). Alternate translation: [so loved] or [loved so much]"
    );
    assert_eq!(writes["alice:2"], "note for alice:2");
    assert_eq!(writes["alice:3"], "note for alice:3");
    assert_eq!(writes["alice:4"], "note for alice:4");

    let status = manager.status();
    assert_eq!(status.stats.programmatic_resolved, 1);
    assert_eq!(status.stats.batches_submitted, 1);
}

#[tokio::test]
async fn test_submission_failure_leaves_rows_eligible() {
    let fixture = Fixture::new();
    fixture.source.add_items(rows("alice", 1..=2));
    let manager = fixture.manager(fast(), &["alice"]);
    fixture.service.set_fail_submit(true);

    manager.scan_all().await;
    assert_eq!(manager.dispatch().await, 0);
    let status = manager.status();
    assert_eq!(status.locked_row_count, 0);
    assert_eq!(status.running_batch_count, 0);
    assert_eq!(status.stats.submission_failures, 1);

    fixture.service.set_fail_submit(false);
    manager.scan_all().await;
    assert_eq!(manager.dispatch().await, 1);
    assert_eq!(manager.status().locked_row_count, 2);
}

#[tokio::test]
async fn test_dry_run_releases_without_writing() {
    let fixture = Fixture::with_service(MockSubmissionService::new().with_auto_complete());
    fixture.source.add_items(rows("alice", 1..=3));
    let manager = fixture.manager(fast().with_dry_run(true), &["alice"]);

    manager.scan_all().await;
    manager.dispatch().await;
    manager.poll_batches().await;

    assert!(fixture.source.writes().is_empty());
    let status = manager.status();
    assert_eq!(status.locked_row_count, 0);
    assert_eq!(status.running_batch_count, 0);
    assert_eq!(status.stats.batches_completed, 2);
}

#[tokio::test]
async fn test_tsv_source_end_to_end() {
    let temp = TempDir::new().unwrap();
    let sheet = temp.path().join("alice.tsv");
    std::fs::write(
        &sheet,
        "row\tbook\tquote\texplanation\talternate\tstatus\n\
         10\tjhn\tin the beginning\tsee how 1:1\tat first\t\n\
         11\tjhn\tthe word\tabstract noun\t\t\n\
         12\tjhn\tdone already\t\t\tdone\n",
    )
    .unwrap();
    let context_dir = temp.path().join("context");
    std::fs::create_dir_all(&context_dir).unwrap();
    std::fs::write(context_dir.join("JHN.txt"), "In the beginning was the Word").unwrap();

    let source = TsvWorkSource::new(BTreeMap::from([("alice".to_string(), sheet.clone())])).with_context_dir(&context_dir);
    let cache_dir = temp.path().join("cache");
    let collab = Collaborators {
        source: Arc::new(source),
        service: Arc::new(MockSubmissionService::new().with_auto_complete()),
        cache: Arc::new(FsContextCache::new(&cache_dir)),
        classifier: Arc::new(RuleClassifier::new()),
    };
    let config = fast();
    let store = BatchStore::new(temp.path().join("state"), &config.instance);
    let manager = BatchManager::new(config, vec![SourceSpec::new("alice")], collab, store).into_shared();

    let reason = manager.clone().run_once().await.unwrap();
    assert_eq!(reason, StopReason::Drained);

    let content = std::fs::read_to_string(&sheet).unwrap();
    let lines: Vec<Vec<&str>> = content.lines().map(|l| l.split('\t').collect()).collect();
    let header = &lines[0];
    let status_col = header.iter().position(|h| *h == "status").unwrap();
    let result_col = header.iter().position(|h| *h == "result").unwrap();

    assert_eq!(lines[1][status_col], STATUS_DONE);
    assert!(lines[1][result_col].starts_with("See how you translated"));
    assert_eq!(lines[2][status_col], STATUS_DONE);
    assert_eq!(lines[2][result_col], "note for alice:11");
    assert_eq!(lines[3][status_col], "done");
    assert_eq!(lines[3][result_col], "");

    assert!(wait_until(|| cache_dir.join("alice").join("JHN.json").exists()).await);
}

#[tokio::test]
async fn test_locks_released_on_every_exit_path() {
    // Programmatic write-back fails
    let fixture = Fixture::new();
    fixture.source.add_items(vec![see_how("alice", "1", "1:1", "alt")]);
    fixture.source.set_fail_writes(true);
    let manager = fixture.manager(fast(), &["alice"]);
    manager.scan_all().await;
    manager.dispatch().await;
    assert_eq!(manager.status().locked_row_count, 0);

    // Submission rejected
    let fixture = Fixture::new();
    fixture.source.add_items(rows("alice", 1..=2));
    fixture.service.set_fail_submit(true);
    let manager = fixture.manager(fast(), &["alice"]);
    manager.scan_all().await;
    manager.dispatch().await;
    assert_eq!(manager.status().locked_row_count, 0);

    // Batch failed at the service
    let fixture = Fixture::new();
    fixture.source.add_items(rows("alice", 1..=2));
    let manager = fixture.manager(fast(), &["alice"]);
    manager.scan_all().await;
    manager.dispatch().await;
    fixture.service.set_status(&fixture.service.handles()[0], batchr::domain::BatchStatus::Failed);
    manager.poll_batches().await;
    assert_eq!(manager.status().locked_row_count, 0);

    // Batch outstanding past the ceiling
    let fixture = Fixture::new();
    fixture.source.add_items(rows("alice", 1..=2));
    let manager = fixture.manager(fast().with_batch_timeout(Duration::from_millis(20)), &["alice"]);
    manager.scan_all().await;
    manager.dispatch().await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    manager.poll_batches().await;
    assert_eq!(manager.status().locked_row_count, 0);
    assert_eq!(manager.status().stats.batches_timed_out, 1);
}

/// Registry size never exceeds capacity and no row sits in two outstanding
/// batches while scan, dispatch and poll race on a multi-thread runtime.
fn assert_registry_consistent(batches: &[batchr::domain::RunningBatch], max: usize) {
    assert!(batches.len() <= max, "{} batches outstanding, capacity {}", batches.len(), max);
    let mut seen = HashSet::new();
    for batch in batches {
        for identity in batch.identities() {
            assert!(seen.insert(identity.clone()), "{} is in two outstanding batches", identity);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatch_and_poll_respect_capacity() {
    let fixture = Fixture::with_service(MockSubmissionService::new().with_auto_complete());
    fixture.source.add_items(rows("alice", 1..=30));
    fixture.source.add_items(rows("bob", 1..=24));
    let max = 2;
    let config = fast().with_max_concurrent_batches(max).with_batch_size(3);
    let manager = fixture.manager(config, &["alice", "bob"]);

    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let sampler = {
        let manager = manager.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut samples = 0;
            while !done.load(std::sync::atomic::Ordering::SeqCst) {
                assert_registry_consistent(&manager.running_batches(), max);
                samples += 1;
                tokio::task::yield_now().await;
            }
            samples
        })
    };

    for _ in 0..60 {
        let scanner = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager.scan_all().await;
                manager.dispatch().await
            })
        };
        let dispatcher = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.dispatch().await })
        };
        let poller = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.poll_batches().await })
        };
        let (scanned, dispatched, polled) = tokio::join!(scanner, dispatcher, poller);
        scanned.unwrap();
        dispatched.unwrap();
        polled.unwrap();

        assert_registry_consistent(&manager.running_batches(), max);
        let status = manager.status();
        assert!(status.running_batch_count <= max);
        assert!(status.locked_row_count <= max * 3);

        if fixture.source.pending_count("alice") == 0
            && fixture.source.pending_count("bob") == 0
            && status.running_batch_count == 0
        {
            break;
        }
    }

    done.store(true, std::sync::atomic::Ordering::SeqCst);
    assert!(sampler.await.unwrap() > 0);

    assert_eq!(fixture.source.pending_count("alice"), 0);
    assert_eq!(fixture.source.pending_count("bob"), 0);
    let written: HashSet<RowIdentity> = fixture.source.writes().into_iter().map(|w| w.identity).collect();
    assert_eq!(written.len(), 54);
    let status = manager.status();
    assert_eq!(status.running_batch_count, 0);
    assert_eq!(status.locked_row_count, 0);
}
