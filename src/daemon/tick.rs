//! Ticker - fixed-interval driver for the scan and monitor loops

use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// Fires immediately, then every `period`; a slow iteration delays the
/// next tick instead of bursting to catch up.
#[derive(Debug)]
pub struct Ticker {
    interval: Interval,
    period: Duration,
    ticks: u64,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            period,
            ticks: 0,
        }
    }

    /// Wait for the next tick; false if `cancel` fired first.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.interval.tick() => {
                self.ticks += 1;
                true
            }
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_tick_is_immediate() {
        let mut ticker = Ticker::new(Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let fired = tokio::time::timeout(Duration::from_millis(100), ticker.tick(&cancel)).await;
        assert_eq!(fired.unwrap(), true);
        assert_eq!(ticker.ticks(), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let mut ticker = Ticker::new(Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        assert!(ticker.tick(&cancel).await);

        cancel.cancel();
        assert!(!ticker.tick(&cancel).await);
        assert_eq!(ticker.ticks(), 1);
        assert_eq!(ticker.period(), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_ticks_repeat() {
        let mut ticker = Ticker::new(Duration::from_millis(5));
        let cancel = CancellationToken::new();
        for _ in 0..3 {
            assert!(ticker.tick(&cancel).await);
        }
        assert_eq!(ticker.ticks(), 3);
    }
}
