use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{
    ClusterConfig, DEFAULT_ENGINE_INSTALL_URL, DEFAULT_SERVICE_CIDR, DriverKind, EngineEnv,
    MachineName,
};

/// Certificate locations for a host.
///
/// Every node in a home directory shares one certificate directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthOptions {
    pub cert_dir: PathBuf,
    pub store_path: PathBuf,
    pub ca_cert_path: PathBuf,
    pub ca_private_key_path: PathBuf,
    pub client_cert_path: PathBuf,
    pub client_key_path: PathBuf,
    pub server_cert_path: PathBuf,
    pub server_key_path: PathBuf,
}

impl AuthOptions {
    /// Paths rooted at the home directory.
    pub fn for_home(home: &Path) -> Self {
        let certs = home.join("certs");
        let machines = home.join("machines");
        Self {
            cert_dir: home.to_path_buf(),
            store_path: home.to_path_buf(),
            ca_cert_path: certs.join("ca.pem"),
            ca_private_key_path: certs.join("ca-key.pem"),
            client_cert_path: certs.join("cert.pem"),
            client_key_path: certs.join("key.pem"),
            server_cert_path: machines.join("server.pem"),
            server_key_path: machines.join("server-key.pem"),
        }
    }
}

/// Settings for the container engine running inside the unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOptions {
    pub env: EngineEnv,
    pub insecure_registry: Vec<String>,
    pub registry_mirror: Vec<String>,
    pub arbitrary_flags: Vec<String>,
    pub install_url: String,
}

impl EngineOptions {
    /// Proxy entries first, then the cluster's own env, duplicates removed.
    ///
    /// The default service CIDR is always trusted as an insecure registry.
    pub fn for_cluster(proxy_env: &[String], cc: &ClusterConfig) -> Self {
        let mut env = EngineEnv::new();
        env.extend(proxy_env.iter().cloned());
        env.extend(cc.docker_env.iter().cloned());

        let mut insecure_registry = vec![DEFAULT_SERVICE_CIDR.to_string()];
        insecure_registry.extend(cc.insecure_registry.iter().cloned());

        Self {
            env: env.deduped(),
            insecure_registry,
            registry_mirror: cc.registry_mirror.clone(),
            arbitrary_flags: cc.docker_opt.clone(),
            install_url: DEFAULT_ENGINE_INSTALL_URL.to_string(),
        }
    }
}

/// Persisted representation of a provisioned unit.
///
/// Only the orchestrator writes it, while holding the machine lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    pub name: MachineName,
    pub driver_name: String,
    pub driver_kind: DriverKind,
    /// Serialized driver-specific configuration.
    pub driver_config: serde_json::Value,
    pub auth: AuthOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(with = "time_serde")]
    pub created_at: SystemTime,
    #[serde(with = "time_serde")]
    pub updated_at: SystemTime,
}

impl HostRecord {
    pub fn new(
        name: MachineName,
        driver_name: impl Into<String>,
        driver_kind: DriverKind,
        driver_config: serde_json::Value,
        auth: AuthOptions,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            name,
            driver_name: driver_name.into(),
            driver_kind,
            driver_config,
            auth,
            engine: None,
            ip: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Marks the record as modified now.
    pub fn touch(&mut self) {
        self.updated_at = SystemTime::now();
    }
}

mod time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        since_epoch.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_options_share_home() {
        let auth = AuthOptions::for_home(Path::new("/home/u/.minikube"));
        assert_eq!(auth.cert_dir, PathBuf::from("/home/u/.minikube"));
        assert_eq!(auth.store_path, auth.cert_dir);
        assert_eq!(auth.ca_cert_path, PathBuf::from("/home/u/.minikube/certs/ca.pem"));
    }

    #[test]
    fn engine_options_dedup_env_and_prefix_service_cidr() {
        let cc = ClusterConfig {
            docker_env: vec!["HTTP_PROXY=http://p:3128".into(), "FOO=1".into()],
            insecure_registry: vec!["registry.local:5000".into()],
            docker_opt: vec!["log-level=debug".into()],
            ..Default::default()
        };
        let proxy = vec!["HTTP_PROXY=http://p:3128".to_string(), "NO_PROXY=localhost".to_string()];

        let opts = EngineOptions::for_cluster(&proxy, &cc);
        assert_eq!(
            opts.env.iter().collect::<Vec<_>>(),
            vec!["HTTP_PROXY=http://p:3128", "NO_PROXY=localhost", "FOO=1"]
        );
        assert_eq!(opts.insecure_registry, vec!["10.96.0.0/12", "registry.local:5000"]);
        assert_eq!(opts.arbitrary_flags, vec!["log-level=debug"]);
    }

    #[test]
    fn host_record_serde_roundtrip() {
        let mut record = HostRecord::new(
            MachineName::from("minikube"),
            "docker",
            DriverKind::Kic,
            serde_json::json!({"cpu": 2}),
            AuthOptions::for_home(Path::new("/tmp/mk")),
        );
        record.ip = Some("192.168.49.2".into());

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"driverKind\":\"kic\""));
        assert!(!json.contains("engine"));

        let back: HostRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, record.name);
        assert_eq!(back.ip.as_deref(), Some("192.168.49.2"));
        assert_eq!(back.driver_config["cpu"], 2);
    }
}
