//! Runner - drives the scan and monitor loops until shutdown
//!
//! The scan loop scans and dispatches once per scan interval until
//! SoftStop. The monitor loop polls once per poll interval until
//! GracefulStop, or until scanning has ended and the registry is empty.
//! A watchdog forces the stop once GracefulStop has lasted longer than
//! `graceful_timeout`.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::daemon::ShutdownState;
use crate::daemon::tick::Ticker;
use crate::error::Result;
use crate::scheduler::BatchManager;

/// Why the loops stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Scanning ended and every batch was retired
    Drained,
    /// Monitoring was stopped with batches possibly outstanding
    Graceful,
    /// Loops were abandoned; outstanding batches stay in the snapshot
    Forced,
}

impl BatchManager {
    /// Recover persisted batches, then run until stopped.
    pub async fn run(self: Arc<Self>) -> Result<StopReason> {
        let report = self.recover().await?;
        tracing::info!(
            resumed = report.resumed,
            completed = report.completed,
            discarded = report.discarded,
            "Recovery finished, starting loops"
        );
        Ok(self.drive(false).await)
    }

    /// Spawn `run` in the background.
    pub fn start(self: &Arc<Self>) -> JoinHandle<Result<StopReason>> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.run().await })
    }

    /// Recover, make one scan pass, and run until the queue and registry drain.
    pub async fn run_once(self: Arc<Self>) -> Result<StopReason> {
        self.recover().await?;
        Ok(self.drive(true).await)
    }

    async fn drive(self: &Arc<Self>, single_pass: bool) -> StopReason {
        let scan = tokio::spawn({
            let manager = Arc::clone(self);
            async move { manager.scan_loop(single_pass).await }
        });
        let monitor = tokio::spawn({
            let manager = Arc::clone(self);
            async move { manager.monitor_loop().await }
        });
        let watchdog = tokio::spawn({
            let shutdown = self.shutdown.clone();
            let timeout = self.config.graceful_timeout;
            async move {
                let graceful = shutdown.graceful_token();
                let force = shutdown.force_token();
                graceful.cancelled().await;
                tokio::select! {
                    _ = force.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        log::warn!("Graceful stop exceeded {:?}, forcing", timeout);
                        shutdown.force();
                    }
                }
            }
        });

        let scan_abort = scan.abort_handle();
        let monitor_abort = monitor.abort_handle();
        let force = self.shutdown.force_token();

        let reason = tokio::select! {
            biased;
            _ = force.cancelled() => {
                scan_abort.abort();
                monitor_abort.abort();
                StopReason::Forced
            }
            _ = async {
                if let Err(e) = scan.await {
                    log::error!("Scan loop ended abnormally: {}", e);
                }
                if let Err(e) = monitor.await {
                    log::error!("Monitor loop ended abnormally: {}", e);
                }
            } => {
                if self.shutdown.state() >= ShutdownState::GracefulStop {
                    StopReason::Graceful
                } else {
                    StopReason::Drained
                }
            }
        };
        watchdog.abort();

        if reason != StopReason::Forced {
            self.persist().await;
        }
        tracing::info!(reason = ?reason, outstanding = self.status().running_batch_count, "Scheduler stopped");
        reason
    }

    async fn scan_loop(&self, single_pass: bool) {
        let soft = self.shutdown.soft_token();
        let mut ticker = Ticker::new(self.config.scan_interval);
        let mut scanned = false;

        while ticker.tick(&soft).await {
            if !(single_pass && scanned) {
                self.scan_all().await;
                scanned = true;
            }
            self.dispatch().await;
            if single_pass && self.lock_state().queue.is_empty() {
                break;
            }
        }

        self.lock_state().scanning_done = true;
        self.wake.notify_one();
        tracing::debug!(ticks = ticker.ticks(), "Scan loop exited");
    }

    async fn monitor_loop(&self) {
        let graceful = self.shutdown.graceful_token();
        let mut ticker = Ticker::new(self.config.poll_interval);

        loop {
            if self.is_drained() {
                tracing::info!("All batches retired, monitor exiting");
                break;
            }
            tokio::select! {
                biased;
                _ = graceful.cancelled() => break,
                _ = self.wake.notified() => continue,
                ticked = ticker.tick(&graceful) => {
                    if !ticked {
                        break;
                    }
                    self.poll_batches().await;
                }
            }
        }
        tracing::debug!(ticks = ticker.ticks(), "Monitor loop exited");
    }

    fn is_drained(&self) -> bool {
        let state = self.lock_state();
        state.scanning_done && state.registry.is_empty()
    }
}
