use std::{env, time::Duration};

use crate::{localpath::MiniPath, lock::LockSpec};

/// Upper bound on a single driver create.
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(4 * 60);

const PROXY_ENV_KEYS: [&str; 3] = ["HTTP_PROXY", "HTTPS_PROXY", "NO_PROXY"];

/// Orchestrator knobs.
///
/// Passed explicitly to [`crate::Orchestrator::new`]; nothing is read from globals after construction.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub lock: LockSpec,
    pub create_timeout: Duration,
    /// `KEY=VALUE` proxy entries forwarded to the unit's container engine ahead of the cluster env.
    pub proxy_env: Vec<String>,
    /// Warn when a deprecated driver is used.
    pub warn_deprecated_drivers: bool,
}

impl OrchestratorConfig {
    pub fn new(paths: &MiniPath) -> Self {
        Self {
            lock: LockSpec::new(paths.locks_dir()),
            create_timeout: DEFAULT_CREATE_TIMEOUT,
            proxy_env: Vec::new(),
            warn_deprecated_drivers: true,
        }
    }

    pub fn with_lock(mut self, lock: LockSpec) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    pub fn with_proxy_env(mut self, env: Vec<String>) -> Self {
        self.proxy_env = env;
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new(&MiniPath::from_env())
    }
}

/// Proxy settings of the current process as `KEY=VALUE` entries.
///
/// Upper-case names win; the lower-case variant is used only when the upper-case one is unset.
pub fn proxy_env_from_process() -> Vec<String> {
    proxy_env_from(|k| env::var(k).ok())
}

fn proxy_env_from(lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut out = Vec::new();
    for key in PROXY_ENV_KEYS {
        let value = lookup(key)
            .filter(|v| !v.is_empty())
            .or_else(|| lookup(&key.to_ascii_lowercase()).filter(|v| !v.is_empty()));
        if let Some(v) = value {
            out.push(format!("{key}={v}"));
        }
    }
    out
}
