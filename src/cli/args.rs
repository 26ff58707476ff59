// file: src/cli/args.rs
// version: 2.0.0
// guid: f6g7h8i9-j0k1-2345-6789-012345fghijk

//! Command line argument definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cluster-bootstrap-agent")]
#[command(about = "Bootstrap and tear down bare-metal k3s and Talos clusters")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "CBA_JSON_LOGS")]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision (or converge) the cluster described by a spec file
    Provision {
        #[arg(short, long)]
        config: PathBuf,

        /// Write the resulting cluster state (including credentials) here instead of stdout
        #[arg(short, long)]
        state_out: Option<PathBuf>,
    },

    /// Reset every node recorded in a saved cluster state
    Destroy {
        #[arg(short, long)]
        state: PathBuf,

        #[arg(short, long)]
        config: PathBuf,
    },

    /// Load and validate a spec file without contacting any node
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print a freshly generated join token
    Token,
}
