//! ID generation utilities for Batchr
//!
//! Provides timestamps and locally unique handles for test doubles and
//! snapshot bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generate a process-unique batch handle
///
/// Format: `{prefix}_{timestamp_ms}_{sequence_hex}`
/// Example: `mockbatch_1738300800123_0004`
pub fn generate_batch_handle(prefix: &str) -> String {
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}_{:04x}", prefix, now_ms(), sequence)
}
