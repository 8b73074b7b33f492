//! CLI module for docpipe
//!
//! Provides command-line interface for:
//! - translate: query description to aggregation pipeline
//! - explain: human-readable translation summary
//! - decode: binary document stream to JSON lines

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{decode, explain, run, run_command, translate};
pub use errors::{CliError, CliResult};
pub use io::{write_error, write_json, write_response};
