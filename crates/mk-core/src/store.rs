use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use mk_model::{HostRecord, MachineName};
use thiserror::Error;
use tracing::debug;

const RECORD_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("host {0} does not exist")]
    NotFound(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("encode host {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Persistence of host records, keyed by machine name.
#[async_trait]
pub trait HostStore: Send + Sync {
    async fn exists(&self, name: &MachineName) -> Result<bool, StoreError>;

    async fn load(&self, name: &MachineName) -> Result<HostRecord, StoreError>;

    async fn save(&self, record: &HostRecord) -> Result<(), StoreError>;

    async fn remove(&self, name: &MachineName) -> Result<(), StoreError>;
}

/// JSON files at `<machines>/<name>/config.json`.
#[derive(Debug, Clone)]
pub struct FileHostStore {
    dir: PathBuf,
}

impl FileHostStore {
    pub fn new(machines_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: machines_dir.into(),
        }
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, name: &MachineName) -> PathBuf {
        self.dir.join(name.as_str()).join(RECORD_FILE)
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl HostStore for FileHostStore {
    async fn exists(&self, name: &MachineName) -> Result<bool, StoreError> {
        let path = self.record_path(name);
        tokio::fs::try_exists(&path).await.map_err(io_err(&path))
    }

    async fn load(&self, name: &MachineName) -> Result<HostRecord, StoreError> {
        let path = self.record_path(name);
        let data = match tokio::fs::read(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_string()));
            }
            Err(e) => return Err(io_err(&path)(e)),
        };
        serde_json::from_slice(&data).map_err(|source| StoreError::Decode { path, source })
    }

    /// Writes to a temporary file first, then renames over the record.
    async fn save(&self, record: &HostRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.name);
        let data = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Encode {
            name: record.name.to_string(),
            source,
        })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await.map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err(&path))?;

        debug!(machine = %record.name, path = %path.display(), "saved host record");
        Ok(())
    }

    async fn remove(&self, name: &MachineName) -> Result<(), StoreError> {
        let dir = self.dir.join(name.as_str());
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&dir)(e)),
        }
    }
}
