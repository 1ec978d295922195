//! Preloaded images tarball: one archive with every image a Kubernetes version needs.

use std::path::PathBuf;

use async_trait::async_trait;
use mk_core::system;
use mk_model::preload_tarball_name;
use tracing::{debug, info};

use crate::{download::download_verified, error::CacheError};

pub const PRELOAD_BASE_URL: &str = "https://storage.googleapis.com/minikube-preloaded-volume-tarballs";

#[async_trait]
pub trait PreloadSource: Send + Sync + 'static {
    /// Whether a tarball is published (or already cached) for this version and runtime.
    async fn exists(&self, kubernetes_version: &str, container_runtime: &str) -> bool;

    /// Ensures the tarball is in the local cache and returns its path.
    ///
    /// A fresh download must match the `.sha256` object published next to it.
    async fn fetch(&self, kubernetes_version: &str, container_runtime: &str) -> Result<PathBuf, CacheError>;
}

/// Preload tarballs served over HTTP and cached under `<home>/cache/preloaded-tarball`.
#[derive(Debug, Clone)]
pub struct HttpPreload {
    client: reqwest::Client,
    base_url: String,
    dir: PathBuf,
}

impl HttpPreload {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: PRELOAD_BASE_URL.to_string(),
            dir: dir.into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn tarball_path(&self, kubernetes_version: &str, container_runtime: &str) -> PathBuf {
        self.dir
            .join(preload_tarball_name(kubernetes_version, container_runtime, system::arch()))
    }

    pub fn remote_url(&self, kubernetes_version: &str, container_runtime: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            preload_tarball_name(kubernetes_version, container_runtime, system::arch())
        )
    }
}

#[async_trait]
impl PreloadSource for HttpPreload {
    async fn exists(&self, kubernetes_version: &str, container_runtime: &str) -> bool {
        if self.tarball_path(kubernetes_version, container_runtime).is_file() {
            return true;
        }
        let url = self.remote_url(kubernetes_version, container_runtime);
        match self.client.head(&url).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                debug!(%url, status = %resp.status(), "no preload published");
                false
            }
            Err(e) => {
                debug!(%url, error = %e, "preload lookup failed");
                false
            }
        }
    }

    async fn fetch(&self, kubernetes_version: &str, container_runtime: &str) -> Result<PathBuf, CacheError> {
        let path = self.tarball_path(kubernetes_version, container_runtime);
        if path.is_file() {
            debug!(path = %path.display(), "found local preload, skipping download");
            return Ok(path);
        }
        let url = self.remote_url(kubernetes_version, container_runtime);
        download_verified(&self.client, &url, &path).await?;
        info!(path = %path.display(), "preloaded images tarball verified and cached");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_and_path_share_the_name() {
        let p = HttpPreload::new("/h/cache/preloaded-tarball").with_base_url("http://mirror.local/");
        let url = p.remote_url("v1.18.3", "docker");
        let path = p.tarball_path("v1.18.3", "docker");
        assert!(url.starts_with("http://mirror.local/preloaded-images-k8s-v3-v1.18.3-docker-overlay2-"));
        assert!(url.ends_with(".tar.lz4"));
        assert_eq!(path.file_name().unwrap().to_string_lossy(), url.rsplit('/').next().unwrap());
    }

    #[tokio::test]
    async fn local_tarball_short_circuits() {
        let tmp = tempfile::tempdir().unwrap();
        let p = HttpPreload::new(tmp.path()).with_base_url("http://127.0.0.1:9");
        std::fs::write(p.tarball_path("v1.18.3", "docker"), b"lz4").unwrap();

        assert!(p.exists("v1.18.3", "docker").await);
        assert_eq!(p.fetch("v1.18.3", "docker").await.unwrap(), p.tarball_path("v1.18.3", "docker"));
    }

    #[tokio::test]
    async fn corrupt_tarball_is_rejected_and_not_cached() {
        let tmp = tempfile::tempdir().unwrap();
        let name = preload_tarball_name("v1.18.3", "docker", system::arch());
        let base = crate::download::testing::serve(vec![
            (format!("/{name}"), b"GARBAGE-NOT-LZ4".to_vec()),
            (
                format!("/{name}.sha256"),
                crate::download::testing::sha256_hex(b"real tarball").into_bytes(),
            ),
        ])
        .await;
        let p = HttpPreload::new(tmp.path()).with_base_url(base);

        assert!(p.exists("v1.18.3", "docker").await);
        let err = p.fetch("v1.18.3", "docker").await.unwrap_err();
        assert!(matches!(err, CacheError::Checksum { .. }), "{err}");
        assert!(!p.tarball_path("v1.18.3", "docker").exists());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
