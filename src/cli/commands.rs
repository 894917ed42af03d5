//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - daemon: run ticks until interrupted
//! - tick: run a single tick
//! - batch: start, inspect or stop a batch job
//! - stats: tier counts and rate budget status
//! - classify: tier and priority for hand-entered signals

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use repowatch::domain::BatchTarget;

/// Repowatch - quota-aware repository tiering and batch analysis
#[derive(Parser, Debug)]
#[command(name = "repowatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use an in-memory store and mock providers
    #[arg(long, global = true)]
    pub dry_run: bool,

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
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler, ticking until Ctrl-C
    Daemon,

    /// Run one tick and print its report
    Tick,

    /// Batch analysis jobs
    Batch {
        #[command(subcommand)]
        command: BatchCommands,
    },

    /// Show tier counts and rate limiter status
    Stats,

    /// Classify a repository from its signals
    Classify {
        /// Star count
        #[arg(short, long)]
        stars: u64,

        /// Stars gained per day
        #[arg(long, default_value_t = 0.0)]
        velocity: f64,

        /// Engagement score (0-100)
        #[arg(short, long, default_value_t = 0.0)]
        engagement: f64,
    },
}

/// Batch subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum BatchCommands {
    /// Start a batch job
    Start {
        /// tier1, tier2, tier3, visible or all
        #[arg(short, long, default_value = "visible")]
        target: BatchTarget,

        /// Use the forced cadence and freshness window
        #[arg(short, long)]
        force: bool,

        /// Wait for the job to finish, printing progress
        #[arg(short, long)]
        wait: bool,
    },

    /// Show progress of a batch job
    Status {
        /// Batch ID
        id: String,
    },

    /// Stop a running batch job
    Stop {
        /// Batch ID
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch_start() {
        let cli = Cli::parse_from(["repowatch", "batch", "start", "--target", "tier1", "--force"]);
        match cli.command {
            Commands::Batch {
                command: BatchCommands::Start { target, force, wait },
            } => {
                assert_eq!(target, BatchTarget::Tier1);
                assert!(force);
                assert!(!wait);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_invalid_target() {
        assert!(Cli::try_parse_from(["repowatch", "batch", "start", "--target", "tier9"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["repowatch", "stats", "--dry-run", "-v"]);
        assert!(cli.dry_run);
        assert!(cli.is_verbose());
        assert!(matches!(cli.command, Commands::Stats));
    }

    #[test]
    fn test_parse_classify() {
        let cli = Cli::parse_from(["repowatch", "classify", "--stars", "30000", "--velocity", "12.5"]);
        match cli.command {
            Commands::Classify {
                stars,
                velocity,
                engagement,
            } => {
                assert_eq!(stars, 30_000);
                assert_eq!(velocity, 12.5);
                assert_eq!(engagement, 0.0);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
