//! CLI argument parsing for the repricer

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rp")]
#[command(author, version, about = "Reprice marketplace offers from a remote table", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reprice every flagged row, round after round
    Run {
        /// Stop after a single round
        #[arg(long)]
        once: bool,

        /// Only these rows (comma separated, 1-based); implies --once
        #[arg(long, value_delimiter = ',')]
        rows: Option<Vec<usize>>,
    },

    /// List the rows flagged to run
    Rows,

    /// Load one row and print its validated configuration
    Show {
        /// Row number (1-based)
        #[arg(required = true)]
        row: usize,
    },

    /// Show the state of the credential pool
    Credentials,
}

/// Path of the repricer log file
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("repricer")
        .join("logs")
        .join("repricer.log")
}
