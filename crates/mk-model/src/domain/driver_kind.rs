use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Class of backend a driver manages.
///
/// Post-start setup branches on this, never on the driver name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DriverKind {
    /// In-memory driver used by tests; nothing runs.
    Mock,
    /// Kubernetes runs directly on the host.
    BareMetal,
    /// A local hypervisor VM.
    Vm,
    /// Kubernetes-in-container: the node is an OCI container.
    Kic,
}

impl DriverKind {
    /// Short identifier for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DriverKind::Mock => "mock",
            DriverKind::BareMetal => "bare-metal",
            DriverKind::Vm => "vm",
            DriverKind::Kic => "kic",
        }
    }

    /// What the unit is called in user-facing output.
    pub fn machine_type(&self) -> &'static str {
        match self {
            DriverKind::Mock | DriverKind::Vm => "VM",
            DriverKind::BareMetal => "bare metal machine",
            DriverKind::Kic => "container",
        }
    }

    #[inline]
    pub fn is_mock(&self) -> bool {
        matches!(self, DriverKind::Mock)
    }

    #[inline]
    pub fn is_bare_metal(&self) -> bool {
        matches!(self, DriverKind::BareMetal)
    }

    /// Bare metal runs the host's own engine, so there is no image cache to fill.
    #[inline]
    pub fn caches_kubernetes_images(&self) -> bool {
        !self.is_bare_metal()
    }

    /// VM and container units get a guest OS fingerprint.
    #[inline]
    pub fn has_guest_os(&self) -> bool {
        matches!(self, DriverKind::Vm | DriverKind::Kic)
    }
}

impl FromStr for DriverKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(DriverKind::Mock),
            "bare-metal" | "baremetal" | "none" => Ok(DriverKind::BareMetal),
            "vm" => Ok(DriverKind::Vm),
            "kic" | "container" => Ok(DriverKind::Kic),
            _ => Err(ModelError::UnknownDriverKind(s.to_string())),
        }
    }
}
