use std::{fmt, sync::Arc};

use mk_model::{DriverKind, HostRecord, MachineName};

use crate::{
    driver::{Driver, DriverError},
    runner::CommandRunner,
};

/// A host record bound to the driver that manages its unit.
#[derive(Clone)]
pub struct Host {
    record: HostRecord,
    driver: Arc<dyn Driver>,
}

impl Host {
    pub fn new(record: HostRecord, driver: Arc<dyn Driver>) -> Self {
        Self { record, driver }
    }

    #[inline]
    pub fn name(&self) -> &MachineName {
        &self.record.name
    }

    #[inline]
    pub fn driver_name(&self) -> &str {
        &self.record.driver_name
    }

    #[inline]
    pub fn kind(&self) -> DriverKind {
        self.record.driver_kind
    }

    #[inline]
    pub fn record(&self) -> &HostRecord {
        &self.record
    }

    #[inline]
    pub fn record_mut(&mut self) -> &mut HostRecord {
        &mut self.record
    }

    #[inline]
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn ip(&self) -> Option<&str> {
        self.record.ip.as_deref()
    }

    pub fn runner(&self) -> Result<Arc<dyn CommandRunner>, DriverError> {
        self.driver.runner(&self.record.name)
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.record.name)
            .field("driver", &self.record.driver_name)
            .field("kind", &self.record.driver_kind)
            .field("ip", &self.record.ip)
            .finish()
    }
}
