//! Command execution and the concrete drivers built on it.
//!
//! [`ExecRunner`] runs commands on this host, [`KicRunner`] runs them inside a node
//! container. The `kic` feature provides the `docker`/`podman` drivers, the `none`
//! feature the bare-metal driver.

mod error;
pub use error::{ExecError, ExecResult};

pub mod util;

mod proc;
pub use proc::ExecRunner;

pub mod oci;
pub use oci::{Oci, OciBinary};

#[cfg(feature = "kic")]
pub mod kic;
#[cfg(feature = "kic")]
pub use kic::{KicConfig, KicDriver, KicRunner};

#[cfg(feature = "none")]
mod none;
#[cfg(feature = "none")]
pub use none::NoneDriver;

mod defaults;
pub use defaults::register_defaults;

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult};
    pub use crate::{ExecRunner, register_defaults};
}
