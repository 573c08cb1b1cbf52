//! CLI argument parsing for sheetcache

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sc")]
#[command(author, version, about = "Cached access to rate-limited remote tables", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Remote table (spreadsheet) id
    #[arg(short, long, required = true)]
    pub table_id: String,

    /// Table (tab) name
    #[arg(short = 'n', long, default_value = "Sheet1")]
    pub table_name: String,

    /// Serve reads from the local snapshot instead of the remote table
    #[arg(long)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print one cell
    Get {
        /// Cell in A1 notation
        #[arg(required = true)]
        cell: String,
    },

    /// Print a range, one tab-separated row per line
    Range {
        /// Range in A1 notation (A1:C10, A:A, 2:4)
        #[arg(required = true)]
        range: String,
    },

    /// Write one cell and push it to the remote table
    Set {
        /// Cell in A1 notation
        #[arg(required = true)]
        cell: String,

        /// Value to store
        #[arg(required = true)]
        value: String,
    },

    /// List every non-blank cell address
    Keys,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set() {
        let cli = Cli::try_parse_from(["sc", "--table-id", "abc", "set", "B2", "9.99"]).unwrap();
        assert_eq!(cli.table_id, "abc");
        assert_eq!(cli.table_name, "Sheet1");
        assert!(matches!(cli.command, Command::Set { ref cell, ref value } if cell == "B2" && value == "9.99"));
    }

    #[test]
    fn test_table_id_required() {
        assert!(Cli::try_parse_from(["sc", "keys"]).is_err());
    }
}
