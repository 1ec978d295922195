use std::path::PathBuf;

use async_trait::async_trait;
use mk_core::MiniPath;
use tracing::debug;

use crate::{download::download_verified, error::CacheError};

pub const KUBERNETES_RELEASE_URL: &str = "https://storage.googleapis.com/kubernetes-release/release";

/// Kubernetes release binaries (kubelet, kubeadm, kubectl).
#[async_trait]
pub trait BinarySource: Send + Sync + 'static {
    /// Ensures `name` for `version`/`os`/`arch` is cached and returns its path.
    ///
    /// Downloads are checked against the `<binary>.sha256` published beside them.
    async fn cache_binary(&self, name: &str, version: &str, os: &str, arch: &str) -> Result<PathBuf, CacheError>;
}

/// Caches release binaries under `<home>/cache/<os>/<version>/`.
#[derive(Debug, Clone)]
pub struct HttpBinaries {
    client: reqwest::Client,
    base_url: String,
    paths: MiniPath,
}

impl HttpBinaries {
    pub fn new(paths: MiniPath) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: KUBERNETES_RELEASE_URL.to_string(),
            paths,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn url(&self, name: &str, version: &str, os: &str, arch: &str) -> String {
        format!("{}/{version}/bin/{os}/{arch}/{name}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl BinarySource for HttpBinaries {
    async fn cache_binary(&self, name: &str, version: &str, os: &str, arch: &str) -> Result<PathBuf, CacheError> {
        let dst = self.paths.binaries_dir(os, version).join(name);
        if dst.is_file() {
            debug!(path = %dst.display(), "binary already cached");
            return Ok(dst);
        }
        download_verified(&self.client, &self.url(name, version, os, arch), &dst).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&dst, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| CacheError::io(&dst, e))?;
        }
        Ok(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_url_layout() {
        let b = HttpBinaries::new(MiniPath::new("/h"));
        assert_eq!(
            b.url("kubeadm", "v1.18.3", "linux", "amd64"),
            "https://storage.googleapis.com/kubernetes-release/release/v1.18.3/bin/linux/amd64/kubeadm"
        );
    }

    #[tokio::test]
    async fn cached_binary_is_not_downloaded_again() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = MiniPath::new(tmp.path());
        let dir = paths.binaries_dir("linux", "v1.18.3");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("kubelet"), b"elf").unwrap();

        let b = HttpBinaries::new(paths).with_base_url("http://127.0.0.1:9");
        let path = b.cache_binary("kubelet", "v1.18.3", "linux", "amd64").await.unwrap();
        assert_eq!(path, dir.join("kubelet"));
    }

    #[tokio::test]
    async fn binary_with_wrong_digest_is_not_cached() {
        use crate::download::testing::{serve, sha256_hex};

        let base = serve(vec![
            ("/v1.18.3/bin/linux/amd64/kubelet".into(), b"truncated elf".to_vec()),
            ("/v1.18.3/bin/linux/amd64/kubelet.sha256".into(), sha256_hex(b"kubelet").into_bytes()),
            ("/v1.18.3/bin/linux/amd64/kubeadm".into(), b"kubeadm".to_vec()),
            ("/v1.18.3/bin/linux/amd64/kubeadm.sha256".into(), sha256_hex(b"kubeadm").into_bytes()),
        ])
        .await;
        let tmp = tempfile::tempdir().unwrap();
        let paths = MiniPath::new(tmp.path());
        let b = HttpBinaries::new(paths.clone()).with_base_url(base);

        let err = b.cache_binary("kubelet", "v1.18.3", "linux", "amd64").await.unwrap_err();
        assert!(matches!(err, CacheError::Checksum { .. }), "{err}");
        assert!(!paths.binaries_dir("linux", "v1.18.3").join("kubelet").exists());

        let kubeadm = b.cache_binary("kubeadm", "v1.18.3", "linux", "amd64").await.unwrap();
        assert_eq!(std::fs::read(kubeadm).unwrap(), b"kubeadm");
    }
}
