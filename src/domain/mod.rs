//! Domain types for Batchr
//!
//! This module contains the core data model:
//! - WorkItem / RowIdentity: a unit of work and its de-duplication key
//! - PendingWork: one source's items from one scan cycle
//! - RunningBatch: a batch outstanding against the AI submission service
//! - GenerationRequest / GenerationResult: what is sent and what comes back

pub mod batch;
pub mod item;
pub mod work;

pub use batch::{BatchHandle, BatchKind, BatchStatus, GenerationRequest, GenerationResult, ResultOutcome, RunningBatch};
pub use item::{ProcessingMode, RESULT_FIELD, RowIdentity, STATUS_DONE, STATUS_FIELD, WorkItem, WriteBack};
pub use work::PendingWork;
