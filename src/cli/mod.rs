//! CLI module for twopc
//!
//! Provides command-line interface for:
//! - init: Write a default configuration file
//! - start: Boot the node and serve HTTP

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{init, run, run_command, start, Config};
pub use errors::{CliError, CliErrorCode, CliResult};
