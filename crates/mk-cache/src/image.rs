//! Container images: the daemon-backed store and the per-image cache directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mk_exec::Oci;
use tracing::{debug, info, instrument};

use crate::error::CacheError;

pub const DEFAULT_IMAGE_REPOSITORY: &str = "k8s.gcr.io";

/// Local image store of a container engine.
#[async_trait]
pub trait ImageStore: Send + Sync + 'static {
    async fn exists(&self, image: &str) -> bool;

    async fn pull(&self, image: &str) -> Result<(), CacheError>;

    /// Writes `image` as a tarball to `out`.
    async fn save(&self, image: &str, out: &Path) -> Result<(), CacheError>;
}

/// [`ImageStore`] over the docker/podman CLI.
#[derive(Debug, Clone)]
pub struct DaemonImageStore {
    oci: Oci,
}

impl DaemonImageStore {
    pub fn new(oci: Oci) -> Self {
        Self { oci }
    }
}

#[async_trait]
impl ImageStore for DaemonImageStore {
    async fn exists(&self, image: &str) -> bool {
        match self.oci.image_exists(image).await {
            Ok(found) => found,
            Err(e) => {
                debug!(image, error = %e, "image lookup failed");
                false
            }
        }
    }

    async fn pull(&self, image: &str) -> Result<(), CacheError> {
        info!(image, daemon = %self.oci.binary(), "pulling image to local daemon");
        self.oci
            .pull(image)
            .await
            .map_err(|e| CacheError::from_pull(image, e))
    }

    async fn save(&self, image: &str, out: &Path) -> Result<(), CacheError> {
        self.oci.save_image(image, out).await.map_err(|e| CacheError::Save {
            image: image.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Where `image` is cached under `dir`: registry path kept as directories, tag separator replaced.
pub fn cache_path(dir: &Path, image: &str) -> PathBuf {
    let image = image.split('@').next().unwrap_or(image);
    dir.join(image.replace(':', "_"))
}

/// Images a node of `kubernetes_version` needs, pulled from `repository` (default registry when empty).
pub fn kubernetes_images(repository: &str, kubernetes_version: &str) -> Vec<String> {
    let repo = if repository.is_empty() {
        DEFAULT_IMAGE_REPOSITORY
    } else {
        repository.trim_end_matches('/')
    };
    let mut images: Vec<String> = ["kube-apiserver", "kube-controller-manager", "kube-scheduler", "kube-proxy"]
        .iter()
        .map(|c| format!("{repo}/{c}:{kubernetes_version}"))
        .collect();
    images.push(format!("{repo}/pause:3.2"));
    images.push(format!("{repo}/etcd:3.4.3-0"));
    images.push(format!("{repo}/coredns:1.6.7"));
    images.push("gcr.io/k8s-minikube/storage-provisioner:v1.8.1".into());
    images.push("kubernetesui/dashboard:v2.0.0".into());
    images.push("kubernetesui/metrics-scraper:v1.0.4".into());
    images
}

/// Saves every image to its tarball under `dir`, pulling it first when the daemon lacks it.
///
/// Already cached images are skipped. Stops at the first failure.
#[instrument(level = "debug", skip(store, images), fields(count = images.len()))]
pub async fn save_to_dir(store: &dyn ImageStore, images: &[String], dir: &Path) -> Result<usize, CacheError> {
    let mut saved = 0;
    for image in images {
        let dst = cache_path(dir, image);
        if dst.is_file() {
            debug!(image, path = %dst.display(), "already cached");
            continue;
        }
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::io(parent, e))?;
        }
        if !store.exists(image).await {
            store.pull(image).await?;
        }
        store.save(image, &dst).await?;
        info!(image, path = %dst.display(), "cached image");
        saved += 1;
    }
    Ok(saved)
}
