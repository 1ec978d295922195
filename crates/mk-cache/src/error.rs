use std::path::PathBuf;

use mk_core::{CoreError, ErrorKind};
use mk_exec::ExecError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("registry requires authentication to pull {image}")]
    NeedsLogin { image: String },

    #[error("github packages registry requires login to pull {image}")]
    GithubNeedsLogin { image: String },

    #[error("pull {image}: {reason}")]
    Pull { image: String, reason: String },

    #[error("save {image}: {reason}")]
    Save { image: String, reason: String },

    #[error("http request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("GET {url} returned {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("{path}: expected {expected} bytes, got {actual}")]
    Truncated { path: PathBuf, expected: u64, actual: u64 },

    #[error("{path}: checksum mismatch, expected sha256 {expected}, got {actual}")]
    Checksum { path: PathBuf, expected: String, actual: String },

    #[error("{url}: not a sha256 digest")]
    BadChecksum { url: String },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    /// Failure that only the user can fix by logging in to a registry.
    #[inline]
    pub fn is_auth(&self) -> bool {
        matches!(self, CacheError::NeedsLogin { .. } | CacheError::GithubNeedsLogin { .. })
    }

    /// Turns a failed `pull` into a structured error, detecting registry auth refusals.
    pub(crate) fn from_pull(image: &str, err: ExecError) -> Self {
        let reason = match err {
            ExecError::NonZeroExit { stderr, .. } => stderr,
            other => other.to_string(),
        };
        if is_auth_refusal(&reason) {
            let image = image.to_string();
            if image.starts_with("docker.pkg.github.com") {
                return CacheError::GithubNeedsLogin { image };
            }
            return CacheError::NeedsLogin { image };
        }
        CacheError::Pull {
            image: image.to_string(),
            reason,
        }
    }
}

fn is_auth_refusal(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    ["unauthorized", "authentication required", "no basic auth credentials", "denied: "]
        .iter()
        .any(|needle| lower.contains(needle))
}

impl From<CacheError> for CoreError {
    fn from(e: CacheError) -> Self {
        let kind = match &e {
            CacheError::NeedsLogin { .. } | CacheError::GithubNeedsLogin { .. } => ErrorKind::RegistryAuthRequired,
            CacheError::Io { .. } => ErrorKind::Io,
            _ => ErrorKind::Backend,
        };
        CoreError::with_source(kind, e)
    }
}
