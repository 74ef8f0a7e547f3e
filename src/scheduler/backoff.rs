//! Permission backoff for work sources.
//!
//! When a source answers with an authorization failure, it is skipped by
//! the scanner until its block expires. Expired entries are removed lazily
//! the next time the source is checked.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Longest block applied when the requested one overflows the clock.
pub const MAX_BLOCK: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// One blocked source.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    /// When the source may be scanned again.
    pub until: Instant,
    /// Error text that caused the block.
    pub reason: String,
}

/// Per-source block state.
#[derive(Debug, Default)]
pub struct BackoffTable {
    entries: HashMap<String, BlockEntry>,
}

impl BackoffTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `source_id` for `duration`, replacing any existing block.
    /// Durations past the clock's range are clamped to [`MAX_BLOCK`].
    pub fn block(&mut self, source_id: &str, duration: Duration, reason: impl Into<String>) {
        let reason = reason.into();
        let now = Instant::now();
        let until = now
            .checked_add(duration)
            .or_else(|| now.checked_add(MAX_BLOCK))
            .unwrap_or(now);
        tracing::warn!(
            source = source_id,
            block_secs = duration.as_secs(),
            reason = %reason,
            "Permission failure, blocking source"
        );
        self.entries.insert(
            source_id.to_string(),
            BlockEntry {
                until,
                reason,
            },
        );
    }

    /// Check if `source_id` is blocked, clearing an expired block.
    pub fn is_blocked(&mut self, source_id: &str) -> bool {
        match self.entries.get(source_id) {
            Some(entry) if Instant::now() < entry.until => true,
            Some(_) => {
                self.entries.remove(source_id);
                tracing::info!(source = source_id, "Permission block expired, source eligible again");
                false
            }
            None => false,
        }
    }

    /// Remaining block time, if blocked.
    pub fn remaining(&self, source_id: &str) -> Option<Duration> {
        self.entries.get(source_id).and_then(|entry| {
            let now = Instant::now();
            if now < entry.until { Some(entry.until - now) } else { None }
        })
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn prune_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.until);
        before - self.entries.len()
    }

    /// Currently blocked sources with their remaining time and reason.
    pub fn blocked_sources(&self) -> Vec<(String, Duration, String)> {
        let now = Instant::now();
        let mut blocked: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| now < entry.until)
            .map(|(source, entry)| (source.clone(), entry.until - now, entry.reason.clone()))
            .collect();
        blocked.sort_by(|a, b| a.0.cmp(&b.0));
        blocked
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
