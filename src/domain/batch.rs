//! Batch types shared by the dispatcher, monitor, and persistence store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::item::{RowIdentity, WorkItem};

/// Opaque handle returned by the AI submission service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchHandle(pub String);

impl BatchHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What produced a batch
///
/// The dispatcher only registers `Ai` batches; programmatic items are written
/// back before a slot is taken. `Programmatic` stays in the persisted schema
/// so snapshots that carry it still load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Programmatic,
    Ai,
}

/// Status reported by the AI submission service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Processing,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl BatchStatus {
    /// Check if the service has stopped working on the batch
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::Processing)
    }

    /// Check if the batch ended without results
    pub fn is_failure(&self) -> bool {
        matches!(self, BatchStatus::Failed | BatchStatus::Cancelled | BatchStatus::Expired)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A batch outstanding against the AI submission service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningBatch {
    pub handle: BatchHandle,
    pub source_id: String,
    pub items: Vec<WorkItem>,
    pub submitted_at: DateTime<Utc>,
    pub kind: BatchKind,
}

impl RunningBatch {
    /// Create a batch submitted now
    pub fn new(handle: BatchHandle, source_id: impl Into<String>, items: Vec<WorkItem>, kind: BatchKind) -> Self {
        Self {
            handle,
            source_id: source_id.into(),
            items,
            submitted_at: Utc::now(),
            kind,
        }
    }

    pub fn identities(&self) -> impl Iterator<Item = &RowIdentity> {
        self.items.iter().map(|item| &item.identity)
    }

    /// Time since submission; zero if the clock went backwards
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.submitted_at).to_std().unwrap_or_default()
    }

    /// Whether the batch has been outstanding longer than `ceiling`
    pub fn is_timed_out(&self, now: DateTime<Utc>, ceiling: Duration) -> bool {
        self.elapsed(now) > ceiling
    }
}

/// One generation request inside a submitted batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Item identity in `source:row` form; results come back keyed by it
    pub custom_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_key: Option<String>,
    pub fields: BTreeMap<String, String>,
}

impl GenerationRequest {
    pub fn from_item(item: &WorkItem) -> Self {
        Self {
            custom_id: item.identity.to_string(),
            context_key: item.context_key.clone(),
            fields: item.fields.clone(),
        }
    }
}

/// Per-request outcome inside a completed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultOutcome {
    Succeeded { text: String },
    Errored { message: String },
}

/// One result fetched from a completed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub custom_id: String,
    pub outcome: ResultOutcome,
}

impl GenerationResult {
    pub fn succeeded(custom_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            custom_id: custom_id.into(),
            outcome: ResultOutcome::Succeeded { text: text.into() },
        }
    }

    pub fn errored(custom_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            custom_id: custom_id.into(),
            outcome: ResultOutcome::Errored {
                message: message.into(),
            },
        }
    }
}
