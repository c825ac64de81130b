//! CLI argument definitions for the squad orchestration core's smoke-test
//! binary.

use clap::{Parser, Subcommand};

/// squad -- manual driver for the squad orchestration core.
#[derive(Parser)]
#[command(name = "squad", version, about = "Manual smoke-test driver for the squad orchestration core")]
pub struct Cli {
    /// Workspace root to operate against (holds `.squad/`).
    #[arg(long, short, default_value = ".")]
    pub workspace: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Break an issue into work items, plan convoys, and print a
    /// coordination report.
    Run {
        /// Issue number to coordinate.
        issue: i64,

        /// Task description to analyze.
        #[arg(long, default_value = "")]
        task: String,
    },

    /// Print aggregate work-item status for the workspace.
    Status,
}
