//! Session counters reported by `BatchManager::status`

use serde::Serialize;

/// Counters since the manager was created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub scan_cycles: u64,
    pub batches_submitted: u64,
    pub batches_completed: u64,
    pub batches_failed: u64,
    pub batches_timed_out: u64,
    /// Submissions the service rejected
    pub submission_failures: u64,
    pub programmatic_resolved: u64,
    pub rows_written: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scanned(&mut self) {
        self.scan_cycles += 1;
    }

    pub fn submitted(&mut self) {
        self.batches_submitted += 1;
    }

    pub fn submission_failed(&mut self) {
        self.submission_failures += 1;
    }

    pub fn completed(&mut self) {
        self.batches_completed += 1;
    }

    pub fn failed(&mut self) {
        self.batches_failed += 1;
    }

    pub fn timed_out(&mut self) {
        self.batches_timed_out += 1;
    }

    pub fn resolved(&mut self, count: usize) {
        self.programmatic_resolved += count as u64;
    }

    pub fn written(&mut self, count: usize) {
        self.rows_written += count as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut stats = SessionStats::new();
        stats.scanned();
        stats.submitted();
        stats.submitted();
        stats.completed();
        stats.failed();
        stats.timed_out();
        stats.submission_failed();
        stats.resolved(3);
        stats.written(5);

        assert_eq!(stats.scan_cycles, 1);
        assert_eq!(stats.batches_submitted, 2);
        assert_eq!(stats.batches_completed, 1);
        assert_eq!(stats.batches_failed, 1);
        assert_eq!(stats.batches_timed_out, 1);
        assert_eq!(stats.submission_failures, 1);
        assert_eq!(stats.programmatic_resolved, 3);
        assert_eq!(stats.rows_written, 5);
    }
}
