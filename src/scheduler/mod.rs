//! Scheduler - the continuous batch manager.
//!
//! This module provides:
//! - **Row locks**: at-most-one-owner tracking per row identity.
//! - **Permission backoff**: per-source circuit breaker for authorization failures.
//! - **Work queue and registry**: queued PendingWork and outstanding batches,
//!   bounded by `max_concurrent_batches`.
//! - **BatchManager**: scanning, dispatch and monitoring over that shared state.
//!
//! # Architecture
//!
//! All bookkeeping lives behind one mutex inside the BatchManager. Scanner,
//! dispatcher and monitor take it only for queue/registry/lock updates and
//! release it before any collaborator I/O:
//! 1. `scan_all` lists pending rows per source and queues PendingWork
//! 2. `dispatch` pops PendingWork, resolves programmatic items and submits batches
//! 3. `poll_batches` checks outstanding batches and retires ended ones
//!
//! # Example
//!
//! ```ignore
//! let manager = BatchManager::new(config, sources, collaborators, store).into_shared();
//! let reason = manager.clone().run().await?;
//! ```

pub(crate) mod backoff;
mod dispatch;
pub(crate) mod locks;
mod manager;
mod monitor;
pub(crate) mod queue;
pub(crate) mod registry;
mod scan;
mod stats;

pub use backoff::{BackoffTable, BlockEntry};
pub use locks::RowLockSet;
pub use manager::{BatchManager, BatchManagerConfig, BlockedSource, Collaborators, SchedulerStatus, SourceSpec};
pub use monitor::BatchFate;
pub use queue::WorkQueue;
pub use registry::BatchRegistry;
pub use stats::SessionStats;

#[cfg(test)]
pub(crate) use manager::tests as manager_tests;
