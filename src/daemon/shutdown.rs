//! Shutdown Controller - staged, monotonic stop
//!
//! Each stop request advances the state one step:
//! Running -> SoftStop -> GracefulStop -> ForceStop.
//!
//! Loops observe the state through a `watch` channel and a cancellation
//! token per stage. Tokens are only ever cancelled, so the state can never
//! move backwards.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Scheduler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownState {
    Running,
    /// No new work; in-flight batches are still monitored
    SoftStop,
    /// Monitoring stopped; the force timer is running
    GracefulStop,
    ForceStop,
}

impl ShutdownState {
    /// The state one stop request further on
    pub fn next(self) -> Self {
        match self {
            ShutdownState::Running => ShutdownState::SoftStop,
            ShutdownState::SoftStop => ShutdownState::GracefulStop,
            ShutdownState::GracefulStop | ShutdownState::ForceStop => ShutdownState::ForceStop,
        }
    }

    /// Whether the scanner and dispatcher may take new work
    pub fn accepts_work(self) -> bool {
        self == ShutdownState::Running
    }
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShutdownState::Running => "running",
            ShutdownState::SoftStop => "soft-stop",
            ShutdownState::GracefulStop => "graceful-stop",
            ShutdownState::ForceStop => "force-stop",
        };
        f.write_str(s)
    }
}

/// Shared handle for reading and advancing the shutdown state
#[derive(Debug, Clone)]
pub struct ShutdownController {
    state: Arc<watch::Sender<ShutdownState>>,
    soft: CancellationToken,
    graceful: CancellationToken,
    force: CancellationToken,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ShutdownState::Running);
        Self {
            state: Arc::new(tx),
            soft: CancellationToken::new(),
            graceful: CancellationToken::new(),
            force: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Advance one step; returns the state after the request.
    pub fn request_stop(&self) -> ShutdownState {
        let target = self.state().next();
        self.advance_to(target)
    }

    /// Move forward to `target`; never moves backwards.
    pub fn advance_to(&self, target: ShutdownState) -> ShutdownState {
        let changed = self.state.send_if_modified(|current| {
            if target > *current {
                *current = target;
                true
            } else {
                false
            }
        });

        let now = self.state();
        if target >= ShutdownState::SoftStop {
            self.soft.cancel();
        }
        if target >= ShutdownState::GracefulStop {
            self.graceful.cancel();
        }
        if target >= ShutdownState::ForceStop {
            self.force.cancel();
        }
        if changed {
            log::info!("Shutdown state advanced to {}", now);
        }
        now
    }

    pub fn force(&self) -> ShutdownState {
        self.advance_to(ShutdownState::ForceStop)
    }

    /// Cancelled on entering SoftStop
    pub fn soft_token(&self) -> CancellationToken {
        self.soft.clone()
    }

    /// Cancelled on entering GracefulStop
    pub fn graceful_token(&self) -> CancellationToken {
        self.graceful.clone()
    }

    /// Cancelled on entering ForceStop
    pub fn force_token(&self) -> CancellationToken {
        self.force.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_stop_steps_forward() {
        let controller = ShutdownController::new();
        assert_eq!(controller.state(), ShutdownState::Running);
        assert_eq!(controller.request_stop(), ShutdownState::SoftStop);
        assert_eq!(controller.request_stop(), ShutdownState::GracefulStop);
        assert_eq!(controller.request_stop(), ShutdownState::ForceStop);
        assert_eq!(controller.request_stop(), ShutdownState::ForceStop);
    }

    #[test]
    fn test_tokens_follow_state() {
        let controller = ShutdownController::new();
        controller.request_stop();
        assert!(controller.soft_token().is_cancelled());
        assert!(!controller.graceful_token().is_cancelled());

        controller.force();
        assert!(controller.graceful_token().is_cancelled());
        assert!(controller.force_token().is_cancelled());
    }

    #[test]
    fn test_advance_never_moves_back() {
        let controller = ShutdownController::new();
        controller.advance_to(ShutdownState::GracefulStop);
        assert_eq!(controller.advance_to(ShutdownState::SoftStop), ShutdownState::GracefulStop);
        assert_eq!(controller.state(), ShutdownState::GracefulStop);
    }

    #[test]
    fn test_clones_share_state() {
        let controller = ShutdownController::new();
        let other = controller.clone();
        other.request_stop();
        assert_eq!(controller.state(), ShutdownState::SoftStop);
    }

    #[test]
    fn test_accepts_work() {
        assert!(ShutdownState::Running.accepts_work());
        assert!(!ShutdownState::SoftStop.accepts_work());
        assert!(!ShutdownState::ForceStop.accepts_work());
    }

    #[tokio::test]
    async fn test_subscribers_observe_transition() {
        let controller = ShutdownController::new();
        let mut rx = controller.subscribe();
        controller.request_stop();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ShutdownState::SoftStop);
    }
}
