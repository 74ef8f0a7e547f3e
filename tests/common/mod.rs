//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use batchr::cache::NoopContextCache;
use batchr::classify::{ALTERNATE_FIELD, EXPLANATION_FIELD, RuleClassifier};
use batchr::domain::WorkItem;
use batchr::scheduler::{BatchManager, BatchManagerConfig, Collaborators, SourceSpec};
use batchr::service::MockSubmissionService;
use batchr::source::MemoryWorkSource;
use batchr::storage::BatchStore;
use tempfile::TempDir;

pub struct Fixture {
    pub source: Arc<MemoryWorkSource>,
    pub service: Arc<MockSubmissionService>,
    pub temp: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_service(MockSubmissionService::new())
    }

    pub fn with_service(service: MockSubmissionService) -> Self {
        Self {
            source: Arc::new(MemoryWorkSource::new()),
            service: Arc::new(service),
            temp: TempDir::new().unwrap(),
        }
    }

    pub fn store(&self, config: &BatchManagerConfig) -> BatchStore {
        BatchStore::new(self.temp.path(), &config.instance)
    }

    /// A manager over this fixture's doubles and state dir; call again to
    /// simulate a restart.
    pub fn manager(&self, config: BatchManagerConfig, sources: &[&str]) -> Arc<BatchManager> {
        let collab = Collaborators {
            source: self.source.clone(),
            service: self.service.clone(),
            cache: Arc::new(NoopContextCache),
            classifier: Arc::new(RuleClassifier::new()),
        };
        let store = self.store(&config);
        let specs = sources.iter().map(|s| SourceSpec::new(*s)).collect();
        BatchManager::new(config, specs, collab, store).into_shared()
    }
}

pub fn fast() -> BatchManagerConfig {
    BatchManagerConfig::default()
        .with_scan_interval(Duration::from_millis(10))
        .with_poll_interval(Duration::from_millis(10))
}

pub fn rows(source: &str, ids: impl IntoIterator<Item = u32>) -> Vec<WorkItem> {
    ids.into_iter().map(|id| WorkItem::new(source, id.to_string())).collect()
}

pub fn see_how(source: &str, row: &str, reference: &str, alternate: &str) -> WorkItem {
    WorkItem::new(source, row)
        .with_field(EXPLANATION_FIELD, format!("see how {}", reference))
        .with_field(ALTERNATE_FIELD, alternate)
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
