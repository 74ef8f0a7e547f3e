//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: recover, then schedule continuously until stopped
//! - once: one scan pass, then wait for outstanding batches
//! - recover: reconcile the persisted snapshot and exit
//! - status: show the persisted snapshot

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Batchr - continuous batch scheduler for AI generation work
#[derive(Parser, Debug)]
#[command(name = "batchr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Recover, then scan and monitor until interrupted
    Run {
        /// Log write-backs instead of performing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Scan once, then run until every submitted batch is retired
    Once {
        /// Log write-backs instead of performing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Reconcile persisted batches with the service and exit
    Recover {
        /// Log write-backs instead of performing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the persisted batch snapshot
    Status,
}

impl Commands {
    pub fn is_dry_run(&self) -> bool {
        match self {
            Commands::Run { dry_run } | Commands::Once { dry_run } | Commands::Recover { dry_run } => *dry_run,
            Commands::Status => false,
        }
    }
}
