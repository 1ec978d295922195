use serde::{Deserialize, Serialize};

use super::node::is_worker_name;
use crate::{
    DEFAULT_CONTAINER_RUNTIME, DEFAULT_KUBERNETES_VERSION, DEFAULT_PROFILE, DEFAULT_SERVICE_CIDR,
    ModelError, Node, base_image,
};

/// Kubernetes-level settings of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesConfig {
    pub kubernetes_version: String,
    /// `docker`, `containerd` or `cri-o`.
    pub container_runtime: String,
    /// Alternative repository for control-plane images. Empty means upstream.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_repository: String,
    pub service_cidr: String,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            kubernetes_version: DEFAULT_KUBERNETES_VERSION.to_string(),
            container_runtime: DEFAULT_CONTAINER_RUNTIME.to_string(),
            image_repository: String::new(),
            service_cidr: DEFAULT_SERVICE_CIDR.to_string(),
        }
    }
}

/// Cluster-wide settings.
///
/// The orchestrator receives this by reference for the duration of one call and never writes back into it;
/// anything it learns (node addresses, the base image that was actually pulled) is returned separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Profile name.
    pub name: String,
    /// Driver name as registered in the driver registry.
    pub driver: String,
    pub cpus: u32,
    pub memory_mb: u64,
    pub disk_size_mb: u64,
    /// Base image for container-as-node backends.
    pub kic_base_image: String,
    /// `KEY=VALUE` entries passed to the container engine inside the unit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub docker_env: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub docker_opt: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insecure_registry: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registry_mirror: Vec<String>,
    /// Images the user asked to keep cached (`cache add`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cache_images: Vec<String>,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    pub nodes: Vec<Node>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_PROFILE.to_string(),
            driver: "docker".to_string(),
            cpus: 2,
            memory_mb: 2200,
            disk_size_mb: 20_000,
            kic_base_image: base_image(),
            docker_env: Vec::new(),
            docker_opt: Vec::new(),
            insecure_registry: Vec::new(),
            registry_mirror: Vec::new(),
            cache_images: Vec::new(),
            kubernetes: KubernetesConfig::default(),
            nodes: vec![Node::control_plane()],
        }
    }
}

impl ClusterConfig {
    /// First control-plane node, if any.
    pub fn control_plane(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.control_plane)
    }

    /// Port of the API server on the primary control-plane node.
    pub fn api_server_port(&self) -> u16 {
        self.control_plane()
            .or_else(|| self.nodes.first())
            .map(|n| n.port)
            .unwrap_or(crate::DEFAULT_API_SERVER_PORT)
    }

    /// Checks the invariants machine naming depends on.
    ///
    /// Worker machine names are `<cluster>-m<digits>`; rejecting cluster names of that shape keeps
    /// the (cluster, node) -> machine name mapping injective.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::EmptyName);
        }
        if let Some((_, suffix)) = self.name.rsplit_once('-')
            && is_worker_name(suffix)
        {
            return Err(ModelError::AmbiguousClusterName(self.name.clone()));
        }
        if self.nodes.is_empty() {
            return Err(ModelError::NoNodes);
        }
        let control_planes = self.nodes.iter().filter(|n| n.control_plane).count();
        if control_planes != 1 {
            return Err(ModelError::ControlPlaneCount(control_planes));
        }
        for node in self.nodes.iter().filter(|n| !n.control_plane) {
            if !is_worker_name(&node.name) {
                return Err(ModelError::InvalidNodeName(node.name.clone()));
            }
        }
        Ok(())
    }
}
