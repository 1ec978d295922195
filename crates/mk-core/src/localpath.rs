use std::{
    env,
    path::{Path, PathBuf},
};

use mk_model::HOME_ENV;

const HOME_DIR_NAME: &str = ".minikube";

/// Layout of the home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiniPath {
    home: PathBuf,
}

impl MiniPath {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Resolves the home directory from `MINIKUBE_HOME`, falling back to `~/.minikube`.
    ///
    /// A `MINIKUBE_HOME` that does not already end in `.minikube` gets it appended.
    pub fn from_env() -> Self {
        let raw = env::var_os(HOME_ENV).filter(|v| !v.is_empty());
        Self::resolve(raw.map(PathBuf::from), env::var_os("HOME").map(PathBuf::from))
    }

    fn resolve(minikube_home: Option<PathBuf>, user_home: Option<PathBuf>) -> Self {
        match minikube_home {
            Some(p) if p.file_name().is_some_and(|n| n == HOME_DIR_NAME) => Self::new(p),
            Some(p) => Self::new(p.join(HOME_DIR_NAME)),
            None => Self::new(user_home.unwrap_or_else(|| PathBuf::from(".")).join(HOME_DIR_NAME)),
        }
    }

    #[inline]
    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn machines_dir(&self) -> PathBuf {
        self.home.join("machines")
    }

    pub fn machine_dir(&self, machine: &str) -> PathBuf {
        self.machines_dir().join(machine)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.home.join("locks")
    }

    /// Files synced into every unit at the same relative path.
    pub fn files_dir(&self) -> PathBuf {
        self.home.join("files")
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.home.join("certs")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.home.join("profiles")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    pub fn images_cache_dir(&self) -> PathBuf {
        self.cache_dir().join("images")
    }

    pub fn preload_dir(&self) -> PathBuf {
        self.cache_dir().join("preloaded-tarball")
    }

    /// `cache/<os>/<version>`, where kubelet/kubeadm/kubectl are stored.
    pub fn binaries_dir(&self, os: &str, version: &str) -> PathBuf {
        self.cache_dir().join(os).join(version)
    }
}

impl Default for MiniPath {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_variants() {
        let p = MiniPath::resolve(Some("/data/.minikube".into()), None);
        assert_eq!(p.home(), Path::new("/data/.minikube"));

        let p = MiniPath::resolve(Some("/data".into()), None);
        assert_eq!(p.home(), Path::new("/data/.minikube"));

        let p = MiniPath::resolve(None, Some("/home/u".into()));
        assert_eq!(p.home(), Path::new("/home/u/.minikube"));
    }

    #[test]
    fn layout() {
        let p = MiniPath::new("/h");
        assert_eq!(p.machine_dir("dev-m02"), PathBuf::from("/h/machines/dev-m02"));
        assert_eq!(p.locks_dir(), PathBuf::from("/h/locks"));
        assert_eq!(p.preload_dir(), PathBuf::from("/h/cache/preloaded-tarball"));
        assert_eq!(p.binaries_dir("linux", "v1.18.3"), PathBuf::from("/h/cache/linux/v1.18.3"));
    }
}
