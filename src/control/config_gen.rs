// file: src/control/config_gen.rs
// version: 1.0.0
// guid: d1382432-ff87-4680-9381-89843a96f5d3

//! Cluster secret and machine-config generation through the control tool

use super::invoker::ControlTool;
use crate::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const SECRETS_FILE: &str = "secrets.yaml";
pub const CONTROLPLANE_FILE: &str = "controlplane.yaml";
pub const WORKER_FILE: &str = "worker.yaml";
pub const TALOSCONFIG_FILE: &str = "talosconfig";

/// Base templates written by `gen config`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseConfig {
    pub controlplane: PathBuf,
    pub worker: PathBuf,
    pub talosconfig: PathBuf,
}

/// Inputs to base config generation
#[derive(Debug, Clone)]
pub struct BaseConfigRequest<'a> {
    pub cluster_name: &'a str,
    pub endpoint: &'a str,
    pub install_disk: &'a str,
    pub talos_version: Option<&'a str>,
    pub kubernetes_version: Option<&'a str>,
}

/// Minimal per-node override merged onto a base template
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NodePatch {
    machine: MachinePatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    cluster: Option<ClusterPatch>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct MachinePatch {
    network: NetworkPatch,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct NetworkPatch {
    hostname: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct ClusterPatch {
    allow_scheduling_on_control_planes: bool,
}

impl NodePatch {
    /// Build the override for one node. The scheduling toggle is only attached to
    /// control-plane nodes, and only when scheduling there is requested.
    pub fn new(hostname: &str, allow_scheduling_on_control_plane: bool, is_control_plane: bool) -> Self {
        let cluster = (is_control_plane && allow_scheduling_on_control_plane).then_some(ClusterPatch {
            allow_scheduling_on_control_planes: true,
        });
        Self {
            machine: MachinePatch {
                network: NetworkPatch {
                    hostname: hostname.to_string(),
                },
            },
            cluster,
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Produces cluster secrets and per-node machine configs in a working directory
pub struct ConfigGenerator {
    tool: Arc<dyn ControlTool>,
    working_dir: PathBuf,
}

impl ConfigGenerator {
    pub fn new(tool: Arc<dyn ControlTool>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            working_dir: working_dir.into(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.working_dir.join(SECRETS_FILE)
    }

    /// Generate the cluster secrets bundle.
    ///
    /// Callers must only invoke this when no bundle exists for the cluster: regenerating
    /// invalidates trust for every node already configured from the old one.
    pub async fn generate_secrets(&self) -> Result<PathBuf> {
        info!("Generating cluster secrets in {}", self.working_dir.display());
        self.tool
            .run(&self.working_dir, None, &args(&["gen", "secrets", "-o", SECRETS_FILE]))
            .await?;
        Ok(self.secrets_path())
    }

    /// Generate control-plane and worker templates plus the admin profile from `secrets`
    pub async fn generate_base_config(
        &self,
        secrets: &Path,
        request: &BaseConfigRequest<'_>,
    ) -> Result<BaseConfig> {
        info!(
            "Generating base configs for cluster {} ({})",
            request.cluster_name, request.endpoint
        );

        let mut a = args(&["gen", "config", request.cluster_name, request.endpoint]);
        a.push("--with-secrets".to_string());
        a.push(secrets.display().to_string());
        a.push("--install-disk".to_string());
        a.push(request.install_disk.to_string());
        if let Some(v) = request.talos_version {
            a.push("--talos-version".to_string());
            a.push(v.to_string());
        }
        if let Some(v) = request.kubernetes_version {
            a.push("--kubernetes-version".to_string());
            a.push(v.to_string());
        }
        a.extend(args(&["--output-dir", ".", "--force"]));

        self.tool.run(&self.working_dir, None, &a).await?;

        Ok(BaseConfig {
            controlplane: self.working_dir.join(CONTROLPLANE_FILE),
            worker: self.working_dir.join(WORKER_FILE),
            talosconfig: self.working_dir.join(TALOSCONFIG_FILE),
        })
    }

    /// Merge a fresh identity patch onto `base`, writing `<hostname>.yaml`.
    /// Patches are never cached or shared between nodes.
    pub async fn patch(
        &self,
        base: &Path,
        hostname: &str,
        allow_scheduling_on_control_plane: bool,
        is_control_plane: bool,
    ) -> Result<PathBuf> {
        let patch = NodePatch::new(hostname, allow_scheduling_on_control_plane, is_control_plane);
        let patch_file = format!("patch-{}.yaml", hostname);
        let out_file = format!("{}.yaml", hostname);

        tokio::fs::write(self.working_dir.join(&patch_file), patch.to_yaml()?).await?;
        debug!("Wrote patch {} for {}", patch_file, hostname);

        self.tool
            .run(
                &self.working_dir,
                None,
                &[
                    "machineconfig".to_string(),
                    "patch".to_string(),
                    base.display().to_string(),
                    "--patch".to_string(),
                    format!("@{}", patch_file),
                    "--output".to_string(),
                    out_file.clone(),
                ],
            )
            .await?;

        Ok(self.working_dir.join(out_file))
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ExecResult;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTool {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl ControlTool for RecordingTool {
        async fn run(
            &self,
            _working_dir: &Path,
            _profile: Option<&Path>,
            args: &[String],
        ) -> ExecResult<String> {
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(String::new())
        }
    }

    #[test]
    fn test_patch_control_plane_with_scheduling() {
        let yaml = NodePatch::new("cp-1", true, true).to_yaml().unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(value["machine"]["network"]["hostname"].as_str(), Some("cp-1"));
        assert_eq!(
            value["cluster"]["allowSchedulingOnControlPlanes"].as_bool(),
            Some(true)
        );
    }

    #[test]
    fn test_patch_omits_scheduling_for_workers_and_when_disabled() {
        let worker = NodePatch::new("worker-1", true, false).to_yaml().unwrap();
        assert!(!worker.contains("cluster"));
        assert!(worker.contains("hostname: worker-1"));

        let cp = NodePatch::new("cp-1", false, true).to_yaml().unwrap();
        assert!(!cp.contains("allowSchedulingOnControlPlanes"));
    }

    #[tokio::test]
    async fn test_base_config_args_and_paths() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(RecordingTool::default());
        let gen = ConfigGenerator::new(tool.clone(), dir.path());

        let base = gen
            .generate_base_config(
                &gen.secrets_path(),
                &BaseConfigRequest {
                    cluster_name: "turing",
                    endpoint: "https://10.0.0.10:6443",
                    install_disk: "/dev/nvme0n1",
                    talos_version: None,
                    kubernetes_version: Some("1.30.1"),
                },
            )
            .await
            .unwrap();

        assert_eq!(base.talosconfig, dir.path().join(TALOSCONFIG_FILE));
        let calls = tool.calls.lock().unwrap();
        let call = &calls[0];
        assert_eq!(call[..4], ["gen", "config", "turing", "https://10.0.0.10:6443"]);
        assert!(call.windows(2).any(|w| w == ["--install-disk", "/dev/nvme0n1"]));
        assert!(call.windows(2).any(|w| w == ["--kubernetes-version", "1.30.1"]));
        assert!(!call.iter().any(|a| a == "--talos-version"));
    }

    #[tokio::test]
    async fn test_patch_writes_fresh_patch_per_node() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(RecordingTool::default());
        let gen = ConfigGenerator::new(tool.clone(), dir.path());
        let base = dir.path().join(WORKER_FILE);

        let a = gen.patch(&base, "worker-1", false, false).await.unwrap();
        let b = gen.patch(&base, "worker-2", false, false).await.unwrap();
        assert_eq!(a, dir.path().join("worker-1.yaml"));
        assert_eq!(b, dir.path().join("worker-2.yaml"));

        let p1 = std::fs::read_to_string(dir.path().join("patch-worker-1.yaml")).unwrap();
        let p2 = std::fs::read_to_string(dir.path().join("patch-worker-2.yaml")).unwrap();
        assert!(p1.contains("worker-1"));
        assert!(p2.contains("worker-2"));

        let calls = tool.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1][4], "@patch-worker-2.yaml");
    }
}
