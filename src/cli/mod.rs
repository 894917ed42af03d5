//! CLI module for repowatch - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running the daemon,
//! single ticks, batch control, statistics and ad-hoc classification.

pub mod commands;

pub use commands::Cli;
