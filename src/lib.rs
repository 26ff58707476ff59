// file: src/lib.rs
// version: 3.0.0
// guid: d82472d1-7f0f-4eb4-b0a3-6e1547103eb4

//! # Cluster Bootstrap Agent
//!
//! Provisions bare-metal Kubernetes clusters on nodes that are already powered and
//! flashed. Two flavors share one phase-sequenced orchestrator:
//!
//! - **k3s**: install scripts run over SSH on each node
//! - **Talos**: machine configs generated and applied through the local `talosctl`

pub mod cli;
pub mod config;
pub mod control;
pub mod destroyer;
pub mod error;
pub mod installer;
pub mod kubeconfig;
pub mod logging;
pub mod network;
pub mod orchestrator;
pub mod poller;

pub use error::{ProvisionError, Result};

/// Version information for the agent
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
