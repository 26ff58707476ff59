// file: src/cli/commands.rs
// version: 2.0.0
// guid: g7h8i9j0-k1l2-3456-7890-123456ghijkl

//! Command implementations for the CLI

use crate::{
    config::{ClusterKind, ClusterSpec, ConfigLoader},
    control::Talosctl,
    installer::Token,
    logging::with_async_operation_span,
    network::SshExecutor,
    orchestrator::{ClusterState, DriverFactory, Orchestrator},
};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Real transports: SSH for k3s nodes, the local talosctl for Talos clusters
fn default_factory(spec: &ClusterSpec) -> anyhow::Result<DriverFactory> {
    let tool = match spec.kind {
        ClusterKind::Talos => Talosctl::locate()?,
        // Never invoked for script-driven clusters
        ClusterKind::K3s => Talosctl::with_binary("talosctl"),
    };
    Ok(DriverFactory::new(
        Arc::new(SshExecutor::new()),
        Arc::new(tool.with_timeout(spec.timeouts.apply_config())),
    ))
}

fn load_spec(path: &Path) -> anyhow::Result<ClusterSpec> {
    ConfigLoader::new()
        .load_cluster_spec(path)
        .with_context(|| format!("Loading cluster spec {}", path.display()))
}

/// Provision the cluster and emit its state as JSON
pub async fn provision_command(
    config: &Path,
    state_out: Option<PathBuf>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let spec = load_spec(config)?;
    info!(
        "Provisioning {} cluster {} ({} control, {} workers)",
        spec.kind.as_str(),
        spec.name,
        spec.control_plane.len(),
        spec.workers.len()
    );

    let orchestrator = Orchestrator::new(default_factory(&spec)?, cancel);
    let state = orchestrator.provision_cluster(&spec).await?;
    let json = serde_json::to_string_pretty(&state)?;

    match state_out {
        Some(path) => {
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("Writing cluster state to {}", path.display()))?;
            info!("Cluster {} is {}; state saved to {}", state.name, state.status, path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Reset every node recorded in a saved state file
pub async fn destroy_command(
    state_path: &Path,
    config: &Path,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let spec = load_spec(config)?;
    let raw = tokio::fs::read_to_string(state_path)
        .await
        .with_context(|| format!("Reading cluster state {}", state_path.display()))?;
    let state: ClusterState = serde_json::from_str(&raw)
        .with_context(|| format!("Parsing cluster state {}", state_path.display()))?;

    let orchestrator = Orchestrator::new(default_factory(&spec)?, cancel);
    let report = with_async_operation_span("destroy", || {
        orchestrator.destroy_cluster(
            &spec,
            state.credentials.as_ref(),
            &state.control_plane,
            &state.workers,
        )
    })
    .await?;

    info!("Reset {} nodes of cluster {}", report.nodes.len(), state.name);
    Ok(())
}

/// Validate a spec file and print a one-line summary
pub async fn validate_command(config: &Path) -> anyhow::Result<()> {
    let spec = load_spec(config)?;
    println!(
        "{}: {} cluster, endpoint {}, {} control-plane node(s), {} worker(s)",
        spec.name,
        spec.kind.as_str(),
        spec.endpoint,
        spec.control_plane.len(),
        spec.workers.len()
    );
    Ok(())
}

/// Print a new join token
pub fn token_command() -> anyhow::Result<()> {
    println!("{}", Token::generate().as_str());
    Ok(())
}
