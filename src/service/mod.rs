//! AI submission service - asynchronous batch generation
//!
//! A batch is submitted once, polled for status, and its results fetched
//! after it completes. Results carry the same `custom_id` as the request
//! (the item's `source:row` identity) so they map back to rows.

use async_trait::async_trait;

use crate::domain::{BatchHandle, BatchStatus, GenerationRequest, GenerationResult};
use crate::error::Result;

mod http;
mod mock;

pub use http::HttpSubmissionService;
pub use mock::MockSubmissionService;

/// External service that runs generation requests as batches
#[async_trait]
pub trait SubmissionService: Send + Sync {
    /// Submit one batch; the returned handle is all the scheduler keeps
    async fn submit(&self, requests: &[GenerationRequest]) -> Result<BatchHandle>;

    async fn status(&self, handle: &BatchHandle) -> Result<BatchStatus>;

    /// Results of a completed batch, keyed by `custom_id`
    async fn fetch_results(&self, handle: &BatchHandle) -> Result<Vec<GenerationResult>>;
}
