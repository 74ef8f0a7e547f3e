//! Error types for Batchr
//!
//! Centralized error handling using thiserror. The variants follow the
//! scheduler's error taxonomy: permission failures trigger source backoff,
//! submission and timeout failures release locks, everything else is
//! transient and retried by a later scan.

use thiserror::Error;

/// Message fragments that mark an opaque service response body as an
/// authorization failure.
const PERMISSION_PHRASES: &[&str] = &[
    "permission",
    "forbidden",
    "access denied",
    "insufficient permissions",
    "the caller does not have permission",
];

/// All error types that can occur in Batchr
#[derive(Debug, Error)]
pub enum BatchrError {
    /// Authorization failure reported by a work source
    #[error("Permission denied: {0}")]
    Permission(String),

    /// The AI submission service rejected a batch
    #[error("Submission rejected: {0}")]
    Submission(String),

    /// A call or a batch exceeded its time ceiling
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Any other collaborator failure; retried on a later cycle
    #[error("Transient error: {0}")]
    Transient(String),

    /// Snapshot persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Operation abandoned because of a forced shutdown
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Internal bookkeeping mismatch (logged, never fatal)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BatchrError {
    /// Whether this error is an authorization-class failure.
    ///
    /// Only `Submission` carries unclassified service text, so it is the one
    /// variant matched by phrase. Every other variant was classified where it
    /// was built.
    pub fn is_permission(&self) -> bool {
        match self {
            BatchrError::Permission(_) => true,
            BatchrError::Io(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            BatchrError::Http(e) => matches!(e.status().map(|s| s.as_u16()), Some(401) | Some(403)),
            BatchrError::Submission(body) => {
                let body = body.to_lowercase();
                PERMISSION_PHRASES.iter().any(|phrase| body.contains(phrase))
            }
            _ => false,
        }
    }

    /// Whether this error came from a call or batch exceeding its ceiling.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BatchrError::Timeout(_))
    }
}

/// Result type alias for Batchr operations
pub type Result<T> = std::result::Result<T, BatchrError>;
