use serde::{Deserialize, Serialize};

use crate::{DEFAULT_API_SERVER_PORT, DEFAULT_KUBERNETES_VERSION};

/// One member of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Node name. Empty for the primary control-plane node.
    #[serde(default)]
    pub name: String,
    /// Address learned from the backend once the unit is up.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
    /// API server port inside the unit.
    pub port: u16,
    pub kubernetes_version: String,
    pub control_plane: bool,
    pub worker: bool,
}

impl Node {
    /// Primary control-plane node with default port and version.
    pub fn control_plane() -> Self {
        Self {
            name: String::new(),
            ip: String::new(),
            port: DEFAULT_API_SERVER_PORT,
            kubernetes_version: DEFAULT_KUBERNETES_VERSION.to_string(),
            control_plane: true,
            worker: true,
        }
    }

    /// Worker node named `m<index>` (`m02`, `m03`, ...).
    pub fn worker(index: usize) -> Self {
        Self {
            name: format!("m{index:02}"),
            ip: String::new(),
            port: DEFAULT_API_SERVER_PORT,
            kubernetes_version: DEFAULT_KUBERNETES_VERSION.to_string(),
            control_plane: false,
            worker: true,
        }
    }

    /// Returns a copy carrying the learned address.
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }
}

/// `m` followed by at least one digit.
pub(crate) fn is_worker_name(name: &str) -> bool {
    name.strip_prefix('m')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}
