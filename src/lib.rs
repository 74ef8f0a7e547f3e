//! Batchr - a continuous batch scheduler
//!
//! Batchr scans per-user work sources for pending rows, resolves the ones it
//! can programmatically, and feeds the rest through an asynchronous AI batch
//! API. Every row is owned by at most one batch at a time, sources that fail
//! authorization are backed off, and outstanding batches survive restarts.

pub mod cache;
pub mod classify;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod id;
pub mod scheduler;
pub mod service;
pub mod source;
pub mod storage;

pub use daemon::{RecoveryReport, ShutdownState, StopReason};
pub use error::{BatchrError, Result};
pub use scheduler::{BatchManager, BatchManagerConfig, Collaborators, SchedulerStatus, SourceSpec};
