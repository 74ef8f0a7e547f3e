//! Mock submission service for testing
//!
//! Batches are kept in memory and stay `Processing` until a test moves
//! them on (or `auto_complete` is set). Every call can be made to fail or
//! to hang, which drives the timeout and shutdown paths.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::SubmissionService;
use crate::domain::{BatchHandle, BatchStatus, GenerationRequest, GenerationResult};
use crate::error::{BatchrError, Result};
use crate::id::generate_batch_handle;

#[derive(Debug, Clone)]
struct MockBatch {
    requests: Vec<GenerationRequest>,
    status: BatchStatus,
}

#[derive(Debug, Default)]
struct Inner {
    batches: BTreeMap<BatchHandle, MockBatch>,
    /// Submission order
    order: Vec<BatchHandle>,
    auto_complete: bool,
    fail_submit: bool,
    fail_status: bool,
    fail_results: bool,
    hang: bool,
    errored: HashSet<String>,
    status_calls: usize,
}

/// In-memory SubmissionService
#[derive(Debug, Default)]
pub struct MockSubmissionService {
    inner: Mutex<Inner>,
}

impl MockSubmissionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: batches report `Completed` as soon as they are submitted.
    pub fn with_auto_complete(self) -> Self {
        self.lock().auto_complete = true;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_status(&self, handle: &BatchHandle, status: BatchStatus) {
        if let Some(batch) = self.lock().batches.get_mut(handle) {
            batch.status = status;
        }
    }

    /// Mark every known batch `Completed`.
    pub fn complete_all(&self) {
        for batch in self.lock().batches.values_mut() {
            batch.status = BatchStatus::Completed;
        }
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.lock().fail_submit = fail;
    }

    pub fn set_fail_status(&self, fail: bool) {
        self.lock().fail_status = fail;
    }

    pub fn set_fail_results(&self, fail: bool) {
        self.lock().fail_results = fail;
    }

    /// Make every call wait forever.
    pub fn set_hang(&self, hang: bool) {
        self.lock().hang = hang;
    }

    /// Report an error result for the request with this `custom_id`.
    pub fn set_result_error(&self, custom_id: impl Into<String>) {
        self.lock().errored.insert(custom_id.into());
    }

    /// Register a batch that was submitted by an earlier process.
    pub fn insert_batch(&self, handle: BatchHandle, requests: Vec<GenerationRequest>, status: BatchStatus) {
        let mut inner = self.lock();
        inner.order.push(handle.clone());
        inner.batches.insert(handle, MockBatch { requests, status });
    }

    /// Requests of every submitted batch, in submission order
    pub fn submitted(&self) -> Vec<Vec<GenerationRequest>> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|handle| inner.batches.get(handle))
            .map(|batch| batch.requests.clone())
            .collect()
    }

    pub fn handles(&self) -> Vec<BatchHandle> {
        self.lock().order.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.lock().status_calls
    }

    async fn maybe_hang(&self) {
        let hang = self.lock().hang;
        if hang {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl SubmissionService for MockSubmissionService {
    async fn submit(&self, requests: &[GenerationRequest]) -> Result<BatchHandle> {
        self.maybe_hang().await;
        let mut inner = self.lock();
        if inner.fail_submit {
            return Err(BatchrError::Submission("mock service rejected the batch".to_string()));
        }
        let handle = BatchHandle::new(generate_batch_handle("mock"));
        let status = if inner.auto_complete {
            BatchStatus::Completed
        } else {
            BatchStatus::Processing
        };
        inner.order.push(handle.clone());
        inner.batches.insert(
            handle.clone(),
            MockBatch {
                requests: requests.to_vec(),
                status,
            },
        );
        Ok(handle)
    }

    async fn status(&self, handle: &BatchHandle) -> Result<BatchStatus> {
        self.maybe_hang().await;
        let mut inner = self.lock();
        inner.status_calls += 1;
        if inner.fail_status {
            return Err(BatchrError::Transient("mock status unavailable".to_string()));
        }
        inner
            .batches
            .get(handle)
            .map(|batch| batch.status)
            .ok_or_else(|| BatchrError::Transient(format!("unknown batch {}", handle)))
    }

    async fn fetch_results(&self, handle: &BatchHandle) -> Result<Vec<GenerationResult>> {
        self.maybe_hang().await;
        let inner = self.lock();
        if inner.fail_results {
            return Err(BatchrError::Transient("mock results unavailable".to_string()));
        }
        let batch = inner
            .batches
            .get(handle)
            .ok_or_else(|| BatchrError::Transient(format!("unknown batch {}", handle)))?;
        Ok(batch
            .requests
            .iter()
            .map(|request| {
                if inner.errored.contains(&request.custom_id) {
                    GenerationResult::errored(&request.custom_id, "generation failed")
                } else {
                    GenerationResult::succeeded(&request.custom_id, format!("note for {}", request.custom_id))
                }
            })
            .collect())
    }
}
