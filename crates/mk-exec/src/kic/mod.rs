//! Kubernetes-in-container driver: each node is a privileged container.

mod runner;
pub use runner::KicRunner;

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use mk_core::{
    CommandRunner, ConfigContext, Driver, DriverError, DriverStatus, MiniPath, UnitInfo, UnitState,
    system,
};
use mk_model::{DriverKind, MachineName, preload_tarball_name};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::ExecError,
    oci::{CreateParams, DOCKER_DAEMON_PORT, Oci, OciBinary, PortMapping, REGISTRY_ADDON_PORT, SSH_PORT},
};

const STATUS_TIMEOUT: Duration = Duration::from_secs(6);
const START_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-node configuration, persisted in the host record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KicConfig {
    /// Container name.
    pub machine_name: String,
    pub profile: String,
    pub cpus: u32,
    pub memory_mb: u64,
    pub store_path: PathBuf,
    pub oci_binary: OciBinary,
    /// Base image, usually pinned by digest.
    pub image: String,
    pub api_server_port: u16,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    pub kubernetes_version: String,
    pub container_runtime: String,
}

impl KicConfig {
    pub fn from_context(ctx: &ConfigContext<'_>, oci_binary: OciBinary) -> Self {
        let cc = ctx.cluster;
        Self {
            machine_name: ctx.machine.to_string(),
            profile: cc.name.clone(),
            cpus: cc.cpus,
            memory_mb: cc.memory_mb,
            store_path: ctx.store_path.to_path_buf(),
            oci_binary,
            image: cc.kic_base_image.clone(),
            api_server_port: cc.api_server_port(),
            envs: BTreeMap::new(),
            kubernetes_version: cc.kubernetes.kubernetes_version.clone(),
            container_runtime: cc.kubernetes.container_runtime.clone(),
        }
    }

    pub fn create_params(&self) -> CreateParams {
        CreateParams {
            name: self.machine_name.clone(),
            image: self.image.clone(),
            profile: self.profile.clone(),
            cpus: self.cpus,
            memory_mb: self.memory_mb,
            envs: self.envs.clone(),
            port_mappings: vec![
                PortMapping::localhost(self.api_server_port),
                PortMapping::localhost(SSH_PORT),
                PortMapping::localhost(DOCKER_DAEMON_PORT),
                PortMapping::localhost(REGISTRY_ADDON_PORT),
            ],
            extra_args: vec!["--expose".into(), self.api_server_port.to_string()],
        }
    }

    /// Where the preloaded images tarball for this node would be cached.
    pub fn preload_tarball(&self) -> PathBuf {
        MiniPath::new(&self.store_path)
            .preload_dir()
            .join(preload_tarball_name(
                &self.kubernetes_version,
                &self.container_runtime,
                system::arch(),
            ))
    }
}

pub struct KicDriver {
    oci: Oci,
}

impl KicDriver {
    pub fn new(binary: OciBinary) -> Self {
        Self { oci: Oci::new(binary) }
    }

    pub fn docker() -> Self {
        Self::new(OciBinary::Docker)
    }

    pub fn podman() -> Self {
        Self::new(OciBinary::Podman)
    }

    /// Best effort; a failed extraction only means images are pulled later.
    async fn extract_preload(&self, cfg: &KicConfig) {
        if self.oci.binary() != OciBinary::Docker {
            debug!("driver isn't docker, skipping preload extraction");
            return;
        }
        let tarball = cfg.preload_tarball();
        if !tarball.is_file() {
            return;
        }
        let start = Instant::now();
        info!(tarball = %tarball.display(), "extracting preloaded images to volume");
        match self
            .oci
            .extract_tarball_to_volume(&tarball, &cfg.machine_name, &cfg.image)
            .await
        {
            Ok(()) => info!(took = ?start.elapsed(), "duration metric: preload extraction"),
            Err(e) => info!(error = %e, "unable to extract preloaded tarball to volume"),
        }
    }

    async fn wait_running(&self, name: &str) -> Result<(), DriverError> {
        let deadline = Instant::now() + START_TIMEOUT;
        let mut delay = Duration::from_millis(100);
        loop {
            let state = self.oci.status(name).await?;
            if state == UnitState::Running {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DriverError::op(
                    "start",
                    format!("expected container state to be running but got {state}"),
                ));
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(2));
        }
    }
}

#[async_trait]
impl Driver for KicDriver {
    fn name(&self) -> &str {
        self.oci.binary().as_str()
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Kic
    }

    fn config(&self, ctx: &ConfigContext<'_>) -> Result<serde_json::Value, DriverError> {
        Ok(serde_json::to_value(KicConfig::from_context(ctx, self.oci.binary()))?)
    }

    async fn inspect(&self, machine: &MachineName) -> Result<Option<UnitInfo>, DriverError> {
        let info = self.oci.inspect(machine.as_str()).await?;
        Ok(info.map(|i| UnitInfo {
            owned: i.owned,
            state: i.state,
        }))
    }

    /// Preload extraction into the node volume runs alongside container creation.
    #[instrument(level = "debug", skip(self, config, cancel), fields(driver = %self.oci.binary()))]
    async fn create(
        &self,
        machine: &MachineName,
        config: &serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<(), DriverError> {
        let cfg: KicConfig = serde_json::from_value(config.clone())?;
        let params = cfg.create_params();

        self.oci
            .create_volume(&params.name, &cfg.profile)
            .await
            .map_err(|e| DriverError::op("create volume", e))?;

        let (created, ()) = tokio::join!(
            self.oci.run_container(&params, &cancel),
            self.extract_preload(&cfg)
        );
        match created {
            Ok(()) => Ok(()),
            Err(ExecError::Cancelled) => Err(DriverError::Cancelled),
            Err(e) => Err(DriverError::op("create kic node", e)),
        }
    }

    async fn start(&self, machine: &MachineName) -> Result<(), DriverError> {
        self.oci
            .start(machine.as_str())
            .await
            .map_err(|e| DriverError::op("start", e))?;
        self.wait_running(machine.as_str()).await?;
        info!(%machine, "container state is running");
        Ok(())
    }

    async fn stop(&self, machine: &MachineName) -> Result<(), DriverError> {
        self.oci
            .stop(machine.as_str())
            .await
            .map_err(|e| DriverError::op("stop", e))
    }

    async fn remove(&self, machine: &MachineName) -> Result<(), DriverError> {
        self.oci
            .remove(machine.as_str())
            .await
            .map_err(|e| DriverError::op("remove", e))?;
        if let Err(e) = self.oci.remove_volume(machine.as_str()).await {
            warn!(%machine, error = %e, "failed to remove node volume");
        }
        if let Some(left) = self.oci.inspect(machine.as_str()).await? {
            return Err(DriverError::op(
                "remove",
                format!("container {machine} still present after delete (state {})", left.state),
            ));
        }
        Ok(())
    }

    async fn state(&self, machine: &MachineName) -> Result<UnitState, DriverError> {
        Ok(self.oci.status(machine.as_str()).await?)
    }

    async fn ip(&self, machine: &MachineName) -> Result<String, DriverError> {
        Ok(self.oci.container_ip(machine.as_str()).await?)
    }

    fn runner(&self, machine: &MachineName) -> Result<Arc<dyn CommandRunner>, DriverError> {
        Ok(Arc::new(KicRunner::new(machine.as_str(), self.oci.clone())))
    }

    async fn status(&self) -> DriverStatus {
        let binary = self.oci.binary();
        let doc = format!("https://minikube.sigs.k8s.io/docs/drivers/{binary}/");
        let mut status = match tokio::time::timeout(STATUS_TIMEOUT, self.oci.version()).await {
            Err(_) => DriverStatus {
                fix: Some(format!("Restart the {binary} service")),
                ..DriverStatus::unhealthy(format!("`{binary} version` timed out"))
            },
            Ok(Ok(version)) => status_from_version(binary, &version),
            Ok(Err(e)) => status_from_error(binary, e),
        };
        if !status.healthy {
            status.doc = Some(doc);
        }
        status
    }
}

fn status_from_version(binary: OciBinary, version: &str) -> DriverStatus {
    if version.starts_with("windows-") {
        return DriverStatus {
            fix: Some("Change container type to \"linux\" in Docker Desktop settings".into()),
            ..DriverStatus::unhealthy("docker daemon is running windows containers")
        };
    }
    debug!(%binary, version, "daemon version");
    DriverStatus::healthy()
}

fn status_from_error(binary: OciBinary, e: ExecError) -> DriverStatus {
    match e {
        ExecError::Spawn { .. } => DriverStatus::not_installed(format!("Install {binary}")),
        ExecError::NonZeroExit { stderr, .. } => {
            let fix = if stderr.contains("permission denied") && cfg!(target_os = "linux") {
                Some("Add your user to the 'docker' group: 'sudo usermod -aG docker $USER && newgrp docker'".to_string())
            } else if stderr.contains("Cannot connect")
                || stderr.contains("refused")
                || stderr.contains("Is the docker daemon running")
            {
                Some(format!("Start the {binary} service"))
            } else {
                None
            };
            DriverStatus {
                fix,
                ..DriverStatus::unhealthy(stderr)
            }
        }
        other => DriverStatus::unhealthy(other.to_string()),
    }
}
