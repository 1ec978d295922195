use std::sync::Arc;

use tracing::{debug, instrument, trace};

use super::Driver;
use crate::error::{CoreError, ErrorKind};

/// Preference order used only by [`DriverRegistry::choose_default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Unknown,
    Obsolete,
    Deprecated,
    Experimental,
    Discouraged,
    Fallback,
    Default,
    Preferred,
    HighlyPreferred,
}

impl Priority {
    /// Never picked automatically.
    #[inline]
    pub fn is_manual_only(&self) -> bool {
        matches!(self, Priority::Unknown | Priority::Obsolete | Priority::Deprecated)
    }
}

#[derive(Clone)]
pub struct DriverDef {
    pub name: String,
    pub priority: Priority,
    pub driver: Arc<dyn Driver>,
}

impl DriverDef {
    pub fn new(driver: Arc<dyn Driver>, priority: Priority) -> Self {
        Self {
            name: driver.name().to_string(),
            priority,
            driver,
        }
    }
}

impl std::fmt::Debug for DriverDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverDef")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("kind", &self.driver.kind())
            .finish()
    }
}

/// Drivers known to this process, populated by the host application.
#[derive(Debug, Default)]
pub struct DriverRegistry {
    defs: Vec<DriverDef>,
}

impl DriverRegistry {
    #[inline]
    pub fn new() -> Self {
        Self { defs: Vec::new() }
    }

    /// Adds a driver; names must be unique.
    pub fn register(&mut self, def: DriverDef) -> Result<(), CoreError> {
        if self.get(&def.name).is_some() {
            return Err(CoreError::new(
                ErrorKind::InvalidConfig,
                format!("driver {:?} is already registered", def.name),
            ));
        }
        trace!(driver = %def.name, priority = ?def.priority, "registered driver");
        self.defs.push(def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DriverDef> {
        self.defs.iter().find(|d| d.name == name)
    }

    /// Resolves `name` or fails with [`ErrorKind::UnsupportedDriver`].
    pub fn resolve(&self, name: &str) -> Result<&DriverDef, CoreError> {
        self.get(name).ok_or_else(|| {
            CoreError::new(
                ErrorKind::UnsupportedDriver,
                format!("unsupported/missing driver: {name}"),
            )
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.defs.iter().map(|d| d.name.as_str()).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Highest-priority healthy driver; ties keep registration order.
    #[instrument(level = "debug", skip(self))]
    pub async fn choose_default(&self) -> Option<&DriverDef> {
        let mut best: Option<&DriverDef> = None;
        for def in &self.defs {
            if def.priority.is_manual_only() {
                continue;
            }
            let status = def.driver.status().await;
            if !status.healthy {
                debug!(driver = %def.name, error = ?status.error, "skipping unhealthy driver");
                continue;
            }
            if best.is_none_or(|b| def.priority > b.priority) {
                best = Some(def);
            }
        }
        best
    }
}
