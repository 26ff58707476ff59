// file: src/main.rs
// version: 2.0.0
// guid: h8i9j0k1-l2m3-4567-8901-234567hijklm

//! Cluster bootstrap agent - main entry point

use clap::Parser;
use cluster_bootstrap_agent::{
    cli::{commands::*, Cli, Commands},
    logging::{init_json_logger, init_logger},
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.json_logs {
        init_json_logger(cli.verbose)?;
    } else {
        init_logger(cli.verbose, cli.quiet)?;
    }

    // Ctrl+C stops polling and per-node work once the in-flight call returns
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling...");
            on_interrupt.cancel();
        }
    });

    let result = match cli.command {
        Commands::Provision { config, state_out } => {
            provision_command(&config, state_out, cancel.clone()).await
        }
        Commands::Destroy { state, config } => destroy_command(&state, &config, cancel.clone()).await,
        Commands::Validate { config } => validate_command(&config).await,
        Commands::Token => token_command(),
    };

    if cancel.is_cancelled() {
        warn!("Interrupted by user");
        std::process::exit(130);
    }
    result
}
