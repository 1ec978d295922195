//! Bare-metal driver: the node is this host.

use std::{net::UdpSocket, sync::Arc};

use async_trait::async_trait;
use mk_core::{CommandRunner, ConfigContext, Driver, DriverError, DriverStatus, UnitInfo, UnitState};
use mk_model::{DriverKind, MachineName};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ExecRunner;

pub const NONE_DRIVER: &str = "none";

#[derive(Debug)]
pub struct NoneDriver {
    runner: Arc<ExecRunner>,
}

impl NoneDriver {
    pub fn new() -> Self {
        Self {
            runner: Arc::new(ExecRunner::new().with_name("none")),
        }
    }
}

impl Default for NoneDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for NoneDriver {
    fn name(&self) -> &str {
        NONE_DRIVER
    }

    fn kind(&self) -> DriverKind {
        DriverKind::BareMetal
    }

    fn config(&self, ctx: &ConfigContext<'_>) -> Result<serde_json::Value, DriverError> {
        Ok(json!({
            "machineName": ctx.machine.as_str(),
            "storePath": ctx.store_path,
            "containerRuntime": ctx.cluster.kubernetes.container_runtime,
        }))
    }

    /// This host never carries a conflicting unit.
    async fn inspect(&self, _machine: &MachineName) -> Result<Option<UnitInfo>, DriverError> {
        Ok(None)
    }

    async fn create(
        &self,
        machine: &MachineName,
        _config: &serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<(), DriverError> {
        info!(%machine, "running on this host, nothing to create");
        Ok(())
    }

    async fn start(&self, machine: &MachineName) -> Result<(), DriverError> {
        debug!(%machine, "start is a no-op");
        Ok(())
    }

    async fn stop(&self, machine: &MachineName) -> Result<(), DriverError> {
        debug!(%machine, "stop is a no-op");
        Ok(())
    }

    async fn remove(&self, machine: &MachineName) -> Result<(), DriverError> {
        debug!(%machine, "remove is a no-op");
        Ok(())
    }

    async fn state(&self, _machine: &MachineName) -> Result<UnitState, DriverError> {
        Ok(UnitState::Running)
    }

    async fn ip(&self, _machine: &MachineName) -> Result<String, DriverError> {
        Ok(outbound_ip().unwrap_or_else(|| "127.0.0.1".to_string()))
    }

    fn runner(&self, _machine: &MachineName) -> Result<Arc<dyn CommandRunner>, DriverError> {
        let runner: Arc<dyn CommandRunner> = self.runner.clone();
        Ok(runner)
    }

    async fn status(&self) -> DriverStatus {
        if cfg!(target_os = "linux") {
            DriverStatus::healthy()
        } else {
            DriverStatus {
                doc: Some("https://minikube.sigs.k8s.io/docs/drivers/none/".into()),
                ..DriverStatus::not_installed("The none driver is only supported on Linux")
            }
        }
    }
}

/// Address of the interface the default route goes through. No packet is sent.
fn outbound_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then(|| ip.to_string())
}
