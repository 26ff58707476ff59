// file: tests/integration_test.rs
// version: 2.0.1
// guid: z6a7b8c9-d0e1-2345-6789-012345zabcde

//! Integration tests for the cluster bootstrap agent

mod common;

use cluster_bootstrap_agent::{
    config::{ClusterKind, ConfigLoader},
    control::classify_exit,
    error::ExecErrorKind,
    orchestrator::{ClusterStatus, Credentials, DriverFactory, Orchestrator, Phase},
    ProvisionError, Result,
};
use common::{cluster_spec, FakeFleet, ScriptedTool};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const ETCD_RUNNING: &str = "NODE     10.0.0.1\nID       etcd\nSTATE    Running\nHEALTH   OK\n";
const ETCD_MEMBERS: &str = "NODE       ID                 HOSTNAME          PEER URLS              CLIENT URLS            LEARNER
10.0.0.1   8c2b4e0ab0d8d1f4   control-plane-1   https://10.0.0.1:2380  https://10.0.0.1:2379  false
";

fn orchestrator(fleet: &FakeFleet, tool: &Arc<ScriptedTool>) -> Orchestrator {
    Orchestrator::new(
        DriverFactory::new(Arc::new(fleet.clone()), tool.clone()),
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn test_config_loading_integration() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    std::env::set_var("CBA_IT_NODE_PASSWORD", "hunter2");

    let config_content = r#"
name: turing
kind: talos
endpoint: https://10.0.0.10:6443
versions:
  talos: v1.7.4
control_plane:
  - host: 10.0.0.10
    hostname: rk1-a
workers:
  - host: 10.0.0.11
    auth:
      type: password
      username: root
      password: ${CBA_IT_NODE_PASSWORD}
timeouts:
  cluster_health: 120
"#;

    let config_path = temp_dir.path().join("cluster.yaml");
    tokio::fs::write(&config_path, config_content).await?;

    let spec = ConfigLoader::new().load_cluster_spec(&config_path)?;

    assert_eq!(spec.kind, ClusterKind::Talos);
    assert_eq!(spec.install_disk, "/dev/mmcblk0");
    assert_eq!(spec.control_plane[0].hostname_or_default(0), "rk1-a");
    assert_eq!(spec.workers[0].hostname_or_default(0), "worker-1");
    assert_eq!(spec.timeouts.cluster_health, 120);
    assert_eq!(spec.timeouts.poll_interval, 5);
    assert!(matches!(
        &spec.workers[0].auth,
        cluster_bootstrap_agent::config::NodeAuth::Password { password, .. } if password == "hunter2"
    ));

    Ok(())
}

#[tokio::test]
async fn test_talos_runs_phases_in_order() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let tool = ScriptedTool::new();
    tool.respond("service etcd", Ok(ETCD_RUNNING));
    let spec = cluster_spec(ClusterKind::Talos, 1, dir.path());

    let state = orchestrator(&FakeFleet::new(), &tool)
        .provision_cluster(&spec)
        .await?;

    let order = [
        "gen secrets",
        "gen config turing https://10.0.0.1:6443",
        "config endpoint 10.0.0.1",
        "machineconfig patch",
        "apply-config --insecure --nodes 10.0.0.1",
        "etcd members",
        "bootstrap --nodes 10.0.0.1",
        "service etcd",
        "apply-config --insecure --nodes 10.0.0.10",
        "health",
        "kubeconfig",
    ];
    let positions: Vec<usize> = order.iter().map(|p| tool.position(p)).collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "calls out of order: {:?}",
        tool.calls()
    );

    assert_eq!(state.status, ClusterStatus::Ready);
    assert_eq!(state.completed_phases.len(), 9);
    assert_eq!(state.completed_phases[4], Phase::Bootstrap);
    assert_eq!(state.control_plane, vec!["10.0.0.1"]);
    assert_eq!(state.workers, vec!["10.0.0.10"]);
    assert!(!state.bootstrap_skipped);

    let creds = state.credentials.expect("credentials extracted");
    assert!(creds.talosconfig.is_some());
    assert!(creds.secrets.is_some());
    Ok(())
}

#[tokio::test]
async fn test_second_run_skips_bootstrap_and_reuses_secrets() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let spec = cluster_spec(ClusterKind::Talos, 1, dir.path());

    let first = ScriptedTool::new();
    first.respond("service etcd", Ok(ETCD_RUNNING));
    orchestrator(&FakeFleet::new(), &first)
        .provision_cluster(&spec)
        .await?;
    assert!(first.called("bootstrap"));

    let second = ScriptedTool::new();
    second.respond("service etcd", Ok(ETCD_RUNNING));
    second.respond("etcd members", Ok(ETCD_MEMBERS));
    let state = orchestrator(&FakeFleet::new(), &second)
        .provision_cluster(&spec)
        .await?;

    assert!(!second.called("bootstrap"));
    assert!(!second.called("gen secrets"));
    assert!(state.bootstrap_skipped);
    assert!(!state.completed_phases.contains(&Phase::Bootstrap));
    assert_eq!(state.status, ClusterStatus::Ready);
    Ok(())
}

#[tokio::test]
async fn test_health_timeout_degrades_but_returns_credentials() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let tool = ScriptedTool::new();
    tool.respond("service etcd", Ok(ETCD_RUNNING));
    tool.respond("health", Err(ExecErrorKind::Exited(1)));
    let mut spec = cluster_spec(ClusterKind::Talos, 2, dir.path());
    spec.timeouts.cluster_health = 0;

    let state = orchestrator(&FakeFleet::new(), &tool)
        .provision_cluster(&spec)
        .await?;

    assert_eq!(state.status, ClusterStatus::Degraded);
    let creds = state.credentials.expect("credentials still extracted");
    let kubeconfig = String::from_utf8(creds.kubeconfig).unwrap();
    assert!(kubeconfig.contains("server: https://10.0.0.1:6443"));
    assert!(!kubeconfig.contains("127.0.0.1"));
    Ok(())
}

#[tokio::test]
async fn test_fatal_apply_failure_names_phase_and_node() {
    let dir = TempDir::new().unwrap();
    let tool = ScriptedTool::new();
    tool.respond("apply-config", Err(ExecErrorKind::Unreachable));
    let mut spec = cluster_spec(ClusterKind::Talos, 0, dir.path());
    spec.timeouts.apply_config = 0;

    let err = orchestrator(&FakeFleet::new(), &tool)
        .provision_cluster(&spec)
        .await
        .unwrap_err();

    match err {
        ProvisionError::Phase { phase, node, source } => {
            assert_eq!(phase, Phase::ApplyControlPlane);
            assert_eq!(node.as_deref(), Some("10.0.0.1"));
            assert!(source.is_timeout());
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!tool.called("bootstrap"));
    assert!(!tool.called("kubeconfig"));
}

#[tokio::test]
async fn test_talos_apply_falls_back_to_authenticated_channel() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let tool = ScriptedTool::new();
    tool.respond("apply-config --insecure", Err(ExecErrorKind::Exited(1)));
    tool.respond("service etcd", Ok(ETCD_RUNNING));
    let spec = cluster_spec(ClusterKind::Talos, 1, dir.path());

    let state = orchestrator(&FakeFleet::new(), &tool)
        .provision_cluster(&spec)
        .await?;

    assert!(dir.path().join("talosconfig").exists());
    assert!(tool.called("apply-config --nodes 10.0.0.1 --endpoints 10.0.0.1"));
    assert!(tool.called("apply-config --nodes 10.0.0.10 --endpoints 10.0.0.10"));
    assert!(
        tool.position("apply-config --insecure --nodes 10.0.0.1")
            < tool.position("apply-config --nodes 10.0.0.1")
    );
    assert_eq!(state.status, ClusterStatus::Ready);
    assert_eq!(state.workers, vec!["10.0.0.10"]);
    Ok(())
}

#[tokio::test]
async fn test_talos_apply_timeout_reports_authenticated_failure() {
    let dir = TempDir::new().unwrap();
    let tool = ScriptedTool::new();
    tool.respond("apply-config --insecure", Err(ExecErrorKind::Exited(1)));
    tool.respond("apply-config --nodes", Err(ExecErrorKind::Unreachable));
    let mut spec = cluster_spec(ClusterKind::Talos, 0, dir.path());
    spec.timeouts.apply_config = 0;

    let err = orchestrator(&FakeFleet::new(), &tool)
        .provision_cluster(&spec)
        .await
        .unwrap_err();

    match err {
        ProvisionError::Phase { phase, source, .. } => {
            assert_eq!(phase, Phase::ApplyControlPlane);
            match *source {
                ProvisionError::Timeout { last, .. } => {
                    assert!(last.contains("insecure:"), "{}", last);
                    assert!(last.contains("authenticated:"), "{}", last);
                    assert!(last.contains("apply-config --nodes 10.0.0.1"), "{}", last);
                }
                other => panic!("expected timeout, got {}", other),
            }
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_k3s_installs_control_then_joins_worker() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let fleet = FakeFleet::new();
    let tool = ScriptedTool::new();
    let spec = cluster_spec(ClusterKind::K3s, 1, dir.path());

    let state = orchestrator(&fleet, &tool).provision_cluster(&spec).await?;

    assert_eq!(state.status, ClusterStatus::Ready);
    assert!(!state.bootstrap_skipped);
    assert!(state.completed_phases.contains(&Phase::Bootstrap));
    assert_eq!(state.completed_phases.len(), 9);
    assert!(tool.calls().is_empty());

    let control = fleet.commands_on("10.0.0.1");
    assert_eq!(control[0], "swapoff -a");
    let install = control
        .iter()
        .find(|c| c.ends_with("sh /tmp/k3s-install.sh"))
        .unwrap();
    assert!(install.contains("INSTALL_K3S_EXEC='server"));
    assert!(!install.contains("K3S_TOKEN"));

    let worker = fleet.commands_on("10.0.0.10");
    let join = worker
        .iter()
        .find(|c| c.ends_with("sh /tmp/k3s-install.sh"))
        .unwrap();
    assert!(join.contains("K3S_URL='https://10.0.0.1:6443'"));
    assert!(join.contains("K3S_TOKEN='K10abc::server:s3cret'"));
    assert!(join.contains("INSTALL_K3S_EXEC='agent"));

    let kubeconfig = String::from_utf8(state.credentials.unwrap().kubeconfig).unwrap();
    assert!(kubeconfig.contains("server: https://10.0.0.1:6443"));
    Ok(())
}

#[tokio::test]
async fn test_k3s_rerun_only_restarts_services() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let fleet = FakeFleet::new();
    fleet.mark_installed("10.0.0.1");
    fleet.mark_installed("10.0.0.10");
    let spec = cluster_spec(ClusterKind::K3s, 1, dir.path());

    let state = orchestrator(&fleet, &ScriptedTool::new())
        .provision_cluster(&spec)
        .await?;

    assert!(state.bootstrap_skipped);
    assert!(!state.completed_phases.contains(&Phase::Bootstrap));
    assert!(!fleet.log().iter().any(|c| c.contains("k3s-install.sh")));
    assert!(fleet
        .commands_on("10.0.0.1")
        .contains(&"systemctl enable --now k3s".to_string()));
    assert!(fleet
        .commands_on("10.0.0.10")
        .contains(&"systemctl enable --now k3s-agent".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_cancelled_run_returns_cancelled() {
    let dir = TempDir::new().unwrap();
    let tool = ScriptedTool::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let orchestrator = Orchestrator::new(
        DriverFactory::new(Arc::new(FakeFleet::new()), tool.clone()),
        cancel,
    );

    let err = orchestrator
        .provision_cluster(&cluster_spec(ClusterKind::Talos, 0, dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Cancelled));
    assert!(tool.calls().is_empty());
}

#[tokio::test]
async fn test_destroy_treats_refused_as_success_and_reports_disk_full() {
    let dir = TempDir::new().unwrap();
    let tool = ScriptedTool::new();
    tool.respond(
        "reset --nodes 10.0.0.10",
        Err(classify_exit(1, "rpc error: code = Unavailable desc = connection refused")),
    );
    tool.respond(
        "reset --nodes 10.0.0.1",
        Err(classify_exit(1, "error resetting node: disk full")),
    );
    let spec = cluster_spec(ClusterKind::Talos, 1, dir.path());
    let credentials = Credentials {
        kubeconfig: b"apiVersion: v1\n".to_vec(),
        talosconfig: Some(b"context: turing\n".to_vec()),
        secrets: None,
    };

    let err = orchestrator(&FakeFleet::new(), &tool)
        .destroy_cluster(
            &spec,
            Some(&credentials),
            &["10.0.0.1".to_string()],
            &["10.0.0.10".to_string()],
        )
        .await
        .unwrap_err();

    assert!(tool.position("reset --nodes 10.0.0.10") < tool.position("reset --nodes 10.0.0.1 "));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("talosconfig")).unwrap(),
        "context: turing\n"
    );
    match err {
        ProvisionError::Destroy(report) => {
            let failed: Vec<_> = report.failures().map(|n| n.host.clone()).collect();
            assert_eq!(failed, vec!["10.0.0.1"]);
            assert_eq!(report.nodes.len(), 2);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_k3s_destroy_skips_clean_nodes() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let fleet = FakeFleet::new();
    fleet
        .state
        .lock()
        .unwrap()
        .unreachable
        .insert("10.0.0.10".to_string());
    let spec = cluster_spec(ClusterKind::K3s, 1, dir.path());

    let report = orchestrator(&fleet, &ScriptedTool::new())
        .destroy_cluster(&spec, None, &spec.control_hosts(), &spec.worker_hosts())
        .await?;

    assert_eq!(report.nodes.len(), 2);
    assert!(fleet
        .commands_on("10.0.0.1")
        .contains(&"/usr/local/bin/k3s-uninstall.sh".to_string()));
    Ok(())
}
