//! CLI module for batchr - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
