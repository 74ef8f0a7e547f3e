//! Work items and their identities
//!
//! A WorkItem is opaque to the scheduler apart from its identity and its
//! processing mode. Collaborator-specific data rides along in `fields`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field written with the generated or resolved text
pub const RESULT_FIELD: &str = "result";

/// Field marking a row as handled
pub const STATUS_FIELD: &str = "status";

/// Value stored in `STATUS_FIELD` once a result is written
pub const STATUS_DONE: &str = "done";

/// Stable identity of one row in one source; the unit of de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowIdentity {
    pub source_id: String,
    pub row_id: String,
}

impl RowIdentity {
    pub fn new(source_id: impl Into<String>, row_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            row_id: row_id.into(),
        }
    }

    /// Parse the `source:row` form produced by `Display`.
    ///
    /// The row id is everything after the last colon, so source ids may
    /// themselves contain colons.
    pub fn parse(s: &str) -> Option<Self> {
        let (source, row) = s.rsplit_once(':')?;
        if source.is_empty() || row.is_empty() {
            return None;
        }
        Some(Self::new(source, row))
    }
}

impl fmt::Display for RowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_id, self.row_id)
    }
}

/// How an item gets resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Resolved in-process without the AI service
    Programmatic,
    /// Must be sent to the AI service
    #[default]
    AiRequired,
}

/// One unit of work read from a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub identity: RowIdentity,

    #[serde(default)]
    pub mode: ProcessingMode,

    /// Key of the auxiliary context this item needs (e.g. a book code)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_key: Option<String>,

    /// Collaborator-specific payload
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl WorkItem {
    /// Create an item with no payload
    pub fn new(source_id: impl Into<String>, row_id: impl Into<String>) -> Self {
        Self {
            identity: RowIdentity::new(source_id, row_id),
            mode: ProcessingMode::default(),
            context_key: None,
            fields: BTreeMap::new(),
        }
    }

    /// Builder: set a payload field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builder: set the context key
    pub fn with_context_key(mut self, key: impl Into<String>) -> Self {
        self.context_key = Some(key.into());
        self
    }

    /// Builder: set the processing mode
    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Read a payload field
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn source_id(&self) -> &str {
        &self.identity.source_id
    }
}

/// A row-level write sent back to a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBack {
    pub identity: RowIdentity,
    pub fields: BTreeMap<String, String>,
}

impl WriteBack {
    /// Write `text` as the row's result and mark the row done.
    pub fn result(identity: RowIdentity, text: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(RESULT_FIELD.to_string(), text.into());
        fields.insert(STATUS_FIELD.to_string(), STATUS_DONE.to_string());
        Self { identity, fields }
    }

    /// The result text, if present
    pub fn text(&self) -> Option<&str> {
        self.fields.get(RESULT_FIELD).map(String::as_str)
    }
}
