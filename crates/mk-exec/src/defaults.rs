#[cfg(any(feature = "kic", feature = "none"))]
use std::sync::Arc;

#[cfg(any(feature = "kic", feature = "none"))]
use mk_core::{DriverDef, Priority};
use mk_core::{CoreError, DriverRegistry};

/// Registers the drivers compiled into this crate.
#[cfg_attr(not(any(feature = "kic", feature = "none")), allow(unused_variables))]
pub fn register_defaults(registry: &mut DriverRegistry) -> Result<(), CoreError> {
    #[cfg(feature = "kic")]
    {
        use crate::KicDriver;

        let docker = if cfg!(target_os = "linux") {
            Priority::Preferred
        } else {
            Priority::Default
        };
        registry.register(DriverDef::new(Arc::new(KicDriver::docker()), docker))?;
        registry.register(DriverDef::new(Arc::new(KicDriver::podman()), Priority::Experimental))?;
    }

    #[cfg(feature = "none")]
    registry.register(DriverDef::new(Arc::new(crate::NoneDriver::new()), Priority::Discouraged))?;

    Ok(())
}
