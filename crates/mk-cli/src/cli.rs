use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use mk_model::{ClusterConfig, DEFAULT_CONTAINER_RUNTIME, DEFAULT_KUBERNETES_VERSION, DEFAULT_PROFILE, KubernetesConfig, Node};
use mk_observe::LoggerFormat;

#[derive(Debug, Parser)]
#[command(version, name = "mk", about = "Runs a local Kubernetes cluster")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// text, json or journald.
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LoggerFormat,

    /// Log filter directive.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Starts a local cluster.
    Start(StartArgs),
}

#[derive(Debug, Args)]
pub struct StartArgs {
    #[arg(short = 'p', long, default_value = DEFAULT_PROFILE)]
    pub profile: String,

    /// Driver to use; picked automatically when omitted.
    #[arg(long, alias = "vm-driver")]
    pub driver: Option<String>,

    #[arg(long, default_value_t = 2)]
    pub cpus: u32,

    /// Memory in MB.
    #[arg(long, default_value_t = 2200)]
    pub memory: u64,

    /// Disk size in MB.
    #[arg(long, default_value_t = 20_000)]
    pub disk_size: u64,

    #[arg(long, default_value = DEFAULT_KUBERNETES_VERSION)]
    pub kubernetes_version: String,

    #[arg(long, default_value = DEFAULT_CONTAINER_RUNTIME)]
    pub container_runtime: String,

    /// Alternative repository for Kubernetes images; disables the preload.
    #[arg(long, default_value = "")]
    pub image_repository: String,

    /// Node base image for container drivers.
    #[arg(long)]
    pub base_image: Option<String>,

    /// Cache Kubernetes images when no preload is available.
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub cache_images: bool,

    /// Download everything needed and exit without starting.
    #[arg(long)]
    pub download_only: bool,

    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub preload: bool,

    /// KEY=VALUE passed to the container engine in the node; repeatable.
    #[arg(long = "docker-env")]
    pub docker_env: Vec<String>,

    #[arg(long = "docker-opt")]
    pub docker_opt: Vec<String>,

    #[arg(long = "insecure-registry")]
    pub insecure_registry: Vec<String>,

    #[arg(long = "registry-mirror")]
    pub registry_mirror: Vec<String>,

    /// Images to keep in the image cache.
    #[arg(long = "cache-image")]
    pub cache_image: Vec<String>,

    #[arg(long, default_value_t = 1)]
    pub nodes: usize,

    /// Seconds to wait for the backend to create a node.
    #[arg(long, default_value_t = 240)]
    pub create_timeout: u64,

    /// Writes Prometheus metrics in text format here when done.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
}

impl StartArgs {
    pub fn cluster_config(&self, driver: &str) -> ClusterConfig {
        let mut nodes = vec![Node::control_plane()];
        nodes.extend((2..=self.nodes.max(1)).map(Node::worker));
        for node in &mut nodes {
            node.kubernetes_version = self.kubernetes_version.clone();
        }

        let defaults = ClusterConfig::default();
        ClusterConfig {
            name: self.profile.clone(),
            driver: driver.to_string(),
            cpus: self.cpus,
            memory_mb: self.memory,
            disk_size_mb: self.disk_size,
            kic_base_image: self.base_image.clone().unwrap_or(defaults.kic_base_image),
            docker_env: self.docker_env.clone(),
            docker_opt: self.docker_opt.clone(),
            insecure_registry: self.insecure_registry.clone(),
            registry_mirror: self.registry_mirror.clone(),
            cache_images: self.cache_image.clone(),
            kubernetes: KubernetesConfig {
                kubernetes_version: self.kubernetes_version.clone(),
                container_runtime: self.container_runtime.clone(),
                image_repository: self.image_repository.clone(),
                ..KubernetesConfig::default()
            },
            nodes,
        }
    }
}
