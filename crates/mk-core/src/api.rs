use std::sync::Arc;

use mk_model::{AuthOptions, HostRecord, MachineName};
use tracing::{debug, instrument};

use crate::{
    driver::{DriverDef, DriverRegistry},
    error::{CoreError, ErrorKind, ResultExt},
    host::Host,
    localpath::MiniPath,
    store::HostStore,
};

/// Host records plus the drivers able to act on them.
pub struct MachineApi {
    registry: Arc<DriverRegistry>,
    store: Arc<dyn HostStore>,
    paths: MiniPath,
}

impl MachineApi {
    pub fn new(registry: Arc<DriverRegistry>, store: Arc<dyn HostStore>, paths: MiniPath) -> Self {
        Self {
            registry,
            store,
            paths,
        }
    }

    #[inline]
    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    #[inline]
    pub fn paths(&self) -> &MiniPath {
        &self.paths
    }

    /// A host exists once its record has been saved.
    pub async fn exists(&self, name: &MachineName) -> Result<bool, CoreError> {
        Ok(self.store.exists(name).await?)
    }

    /// Builds an unsaved host from serialized driver configuration.
    pub fn new_host(&self, def: &DriverDef, name: &MachineName, raw: &[u8]) -> Result<Host, CoreError> {
        let driver_config: serde_json::Value = serde_json::from_slice(raw)
            .map_err(|e| CoreError::with_source(ErrorKind::InvalidConfig, e))?;
        let record = HostRecord::new(
            name.clone(),
            def.name.clone(),
            def.driver.kind(),
            driver_config,
            AuthOptions::for_home(self.paths.home()),
        );
        Ok(Host::new(record, Arc::clone(&def.driver)))
    }

    #[instrument(level = "debug", skip(self), fields(machine = %name))]
    pub async fn load(&self, name: &MachineName) -> Result<Host, CoreError> {
        let record = self.store.load(name).await?;
        let def = self
            .registry
            .resolve(&record.driver_name)
            .with_context(|| format!("driver for {name}"))?;
        debug!(driver = %def.name, "loaded host");
        Ok(Host::new(record, Arc::clone(&def.driver)))
    }

    pub async fn save(&self, host: &Host) -> Result<(), CoreError> {
        Ok(self.store.save(host.record()).await?)
    }

    pub async fn remove(&self, name: &MachineName) -> Result<(), CoreError> {
        Ok(self.store.remove(name).await?)
    }
}
