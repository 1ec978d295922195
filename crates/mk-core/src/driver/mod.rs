//! Backend driver contract and the registry that resolves drivers by name.

mod registry;
pub use registry::{DriverDef, DriverRegistry, Priority};

use std::{fmt, path::Path, sync::Arc};

use async_trait::async_trait;
use mk_model::{ClusterConfig, DriverKind, MachineName, Node};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::runner::{CommandRunner, RunnerError};

/// Observed state of a backend unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Running,
    Paused,
    Stopped,
    Starting,
    Stopping,
    Error,
    /// The backend has no unit with this name.
    Missing,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitState::Running => "Running",
            UnitState::Paused => "Paused",
            UnitState::Stopped => "Stopped",
            UnitState::Starting => "Starting",
            UnitState::Stopping => "Stopping",
            UnitState::Error => "Error",
            UnitState::Missing => "Missing",
        };
        f.write_str(s)
    }
}

/// What the backend knows about a unit carrying the machine name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitInfo {
    /// Carries our ownership label, so it is safe to delete and recreate.
    pub owned: bool,
    pub state: UnitState,
}

/// Whether a driver is usable on this host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverStatus {
    pub installed: bool,
    pub healthy: bool,
    pub error: Option<String>,
    /// Suggested remedy shown to the user.
    pub fix: Option<String>,
    pub doc: Option<String>,
}

impl DriverStatus {
    pub fn healthy() -> Self {
        Self {
            installed: true,
            healthy: true,
            ..Default::default()
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            installed: true,
            healthy: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn not_installed(fix: impl Into<String>) -> Self {
        Self {
            installed: false,
            healthy: false,
            error: Some("not installed".into()),
            fix: Some(fix.into()),
            doc: None,
        }
    }
}

/// Inputs for building a driver-specific configuration.
#[derive(Debug, Clone, Copy)]
pub struct ConfigContext<'a> {
    pub cluster: &'a ClusterConfig,
    pub node: &'a Node,
    pub machine: &'a MachineName,
    /// Home directory the host records live under.
    pub store_path: &'a Path,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid driver config: {0}")]
    Config(String),
    #[error("unit {0} not found")]
    NotFound(String),
    #[error("{op} failed: {reason}")]
    Operation { op: &'static str, reason: String },
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error("driver config encoding: {0}")]
    Json(#[from] serde_json::Error),
}

impl DriverError {
    pub fn op(op: &'static str, reason: impl ToString) -> Self {
        DriverError::Operation {
            op,
            reason: reason.to_string(),
        }
    }
}

/// A virtualization or container backend.
///
/// Implementations key every unit by [`MachineName`]. The orchestrator serializes all
/// calls for one machine name through the machine lock.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Registry name, e.g. `docker`.
    fn name(&self) -> &str;

    fn kind(&self) -> DriverKind;

    /// Driver-specific configuration for one node, persisted in the host record.
    fn config(&self, ctx: &ConfigContext<'_>) -> Result<serde_json::Value, DriverError>;

    /// `None` when the backend has no unit with this name.
    async fn inspect(&self, machine: &MachineName) -> Result<Option<UnitInfo>, DriverError>;

    /// Creates and boots the unit.
    ///
    /// `cancel` is triggered when the caller stops waiting; implementations should stop
    /// promptly but may leave partial backend state behind.
    async fn create(
        &self,
        machine: &MachineName,
        config: &serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<(), DriverError>;

    async fn start(&self, machine: &MachineName) -> Result<(), DriverError>;

    async fn stop(&self, machine: &MachineName) -> Result<(), DriverError>;

    async fn remove(&self, machine: &MachineName) -> Result<(), DriverError>;

    async fn state(&self, machine: &MachineName) -> Result<UnitState, DriverError>;

    async fn ip(&self, machine: &MachineName) -> Result<String, DriverError>;

    fn runner(&self, machine: &MachineName) -> Result<Arc<dyn CommandRunner>, DriverError>;

    async fn status(&self) -> DriverStatus {
        DriverStatus::healthy()
    }

    async fn exists(&self, machine: &MachineName) -> Result<bool, DriverError> {
        Ok(self.inspect(machine).await?.is_some())
    }
}
