//! Storage layer for Batchr - the persisted registry snapshot.
//!
//! The snapshot is the only durable state the scheduler owns. Row locks,
//! the work queue and the backoff table are rebuilt from it (and from
//! fresh scans) after a restart.

mod snapshot;

pub use snapshot::{BatchSnapshot, BatchStore, SCHEMA_VERSION};
