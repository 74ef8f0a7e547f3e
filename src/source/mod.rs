//! Work sources - where pending items come from and results go back to
//!
//! A WorkSource holds the authoritative items for a set of named sources.
//! Authorization failures must surface as errors for which
//! `BatchrError::is_permission()` is true so the scheduler can back off.

use async_trait::async_trait;

use crate::domain::{WorkItem, WriteBack};
use crate::error::Result;

mod memory;
mod tsv;

pub use memory::MemoryWorkSource;
pub use tsv::{CONTEXT_COLUMN, ROW_COLUMN, TsvWorkSource};

/// External system holding work items and accepting result write-backs
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Items currently pending in `source_id`, in source order
    async fn list_pending(&self, source_id: &str) -> Result<Vec<WorkItem>>;

    /// Write results back; re-writing the same result must be harmless
    async fn write_back(&self, source_id: &str, writes: &[WriteBack]) -> Result<()>;

    /// Auxiliary reference data for `key`; `Null` when there is none
    async fn fetch_context(&self, source_id: &str, key: &str) -> Result<serde_json::Value>;
}
