//! Permission backoff tests
//!
//! A source that fails authorization is skipped for the block duration while
//! other sources keep flowing, then picked up again once the block expires.

mod common;

use std::time::Duration;

use common::{Fixture, fast, rows};

#[tokio::test]
async fn test_denied_source_blocked_then_resumed() {
    let fixture = Fixture::new();
    fixture.source.add_items(rows("alice", 1..=2));
    fixture.source.add_items(rows("bob", 1..=2));
    fixture.source.deny("bob");
    let config = fast().with_permission_block(Duration::from_millis(100));
    let manager = fixture.manager(config, &["alice", "bob"]);

    assert_eq!(manager.scan_all().await, 1);
    assert!(manager.is_source_blocked("bob"));
    assert!(!manager.is_source_blocked("alice"));

    let status = manager.status();
    assert_eq!(status.blocked_sources.len(), 1);
    assert_eq!(status.blocked_sources[0].source_id, "bob");
    assert!(status.blocked_sources[0].reason.contains("not shared"));

    // Within the block window bob is not even asked
    manager.dispatch().await;
    manager.scan_all().await;
    assert_eq!(fixture.source.list_calls("bob"), 1);
    assert_eq!(fixture.service.submitted().len(), 1);

    fixture.source.allow("bob");
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(manager.scan_all().await, 1);
    assert_eq!(fixture.source.list_calls("bob"), 2);
    assert!(!manager.is_source_blocked("bob"));
    assert!(manager.status().blocked_sources.is_empty());

    manager.dispatch().await;
    let submitted = fixture.service.submitted();
    assert_eq!(submitted.len(), 2);
    assert!(submitted[1].iter().all(|r| r.custom_id.starts_with("bob:")));
}

#[tokio::test]
async fn test_denied_source_never_halts_scanning() {
    let fixture = Fixture::new();
    fixture.source.add_items(rows("carol", 1..=3));
    fixture.source.deny("alice");
    fixture.source.deny("bob");
    let manager = fixture.manager(fast(), &["alice", "bob", "carol"]);

    assert_eq!(manager.scan_all().await, 1);
    assert_eq!(manager.status().blocked_sources.len(), 2);
    assert_eq!(manager.status().queued_items, 3);
}

#[tokio::test]
async fn test_write_back_permission_failure_blocks_source_and_retries() {
    let fixture = Fixture::new();
    fixture.source.add_items(rows("alice", 1..=2));
    let config = fast().with_permission_block(Duration::from_millis(50));
    let manager = fixture.manager(config, &["alice"]);

    manager.scan_all().await;
    manager.dispatch().await;
    fixture.service.complete_all();
    fixture.source.deny("alice");

    assert_eq!(manager.poll_batches().await, 0);
    assert!(manager.is_source_blocked("alice"));
    assert_eq!(manager.status().locked_row_count, 2);

    fixture.source.allow("alice");
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(manager.poll_batches().await, 1);
    assert_eq!(fixture.source.writes().len(), 2);
    assert_eq!(manager.status().locked_row_count, 0);
}

#[tokio::test]
async fn test_blocked_source_skipped_by_running_loops() {
    let fixture = Fixture::with_service(batchr::service::MockSubmissionService::new().with_auto_complete());
    fixture.source.add_items(rows("alice", 1..=4));
    fixture.source.add_items(rows("bob", 1..=4));
    fixture.source.deny("bob");
    let manager = fixture.manager(fast(), &["alice", "bob"]);

    manager.clone().run_once().await.unwrap();

    let writes = fixture.source.writes();
    assert_eq!(writes.len(), 4);
    assert!(writes.iter().all(|w| w.identity.source_id == "alice"));
    assert_eq!(fixture.source.pending_count("bob"), 4);
    assert!(manager.is_source_blocked("bob"));
}
