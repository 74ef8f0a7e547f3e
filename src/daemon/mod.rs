//! Daemon Core - shutdown control, loop driving, and crash recovery
//!
//! The daemon side of the scheduler:
//! - Advances the shutdown state on each stop request
//! - Runs the scan and monitor loops on fixed tickers
//! - Recovers batches persisted by an earlier process

pub mod recovery;
pub mod runner;
pub mod shutdown;
pub mod tick;

pub use recovery::{RecoveryAction, RecoveryReport};
pub use runner::StopReason;
pub use shutdown::{ShutdownController, ShutdownState};
pub use tick::Ticker;
