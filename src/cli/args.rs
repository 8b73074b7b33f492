//! CLI argument definitions using clap
//!
//! Commands:
//! - docpipe translate --query <path> [--config <path>] [--bson <path>]
//! - docpipe explain --query <path> [--config <path>]
//! - docpipe decode --input <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// docpipe - translate query descriptions into aggregation pipelines
#[derive(Parser, Debug)]
#[command(name = "docpipe")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log every event, including trace-level planning detail
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Translate a query and print the pipeline as JSON
    Translate {
        /// Path to the JSON query description
        #[arg(long)]
        query: PathBuf,

        /// Path to translator configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Also write the stages to this file as a binary document stream
        #[arg(long)]
        bson: Option<PathBuf>,
    },

    /// Explain how a query translates
    Explain {
        /// Path to the JSON query description
        #[arg(long)]
        query: PathBuf,

        /// Path to translator configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Decode a binary document stream, one JSON document per line
    Decode {
        /// Path to the document stream
        #[arg(long)]
        input: PathBuf,

        /// Path to translator configuration file (codec limits)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_translate() {
        let cli = Cli::try_parse_from([
            "docpipe", "translate", "--query", "q.json", "--bson", "out.bson",
        ])
        .unwrap();
        assert!(!cli.verbose);
        match cli.command {
            Command::Translate { query, config, bson } => {
                assert_eq!(query, PathBuf::from("q.json"));
                assert!(config.is_none());
                assert_eq!(bson, Some(PathBuf::from("out.bson")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_verbose_is_global() {
        let cli = Cli::try_parse_from(["docpipe", "decode", "--input", "a.bson", "--verbose"])
            .unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn test_query_is_required() {
        assert!(Cli::try_parse_from(["docpipe", "explain"]).is_err());
    }
}
