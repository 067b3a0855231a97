//! CLI argument definitions using clap
//!
//! Commands:
//! - twopc init --config <path>
//! - twopc start --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// twopc - a two-phase commit node with crash injection and recovery
#[derive(Parser, Debug)]
#[command(name = "twopc")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a default configuration file
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./twopc.json")]
        config: PathBuf,

        /// Keep decision logs on disk under this directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Base URL peers use to reach this node
        #[arg(long)]
        node_url: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Start the node and serve HTTP
    Start {
        /// Path to configuration file
        #[arg(long, default_value = "./twopc.json")]
        config: PathBuf,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
