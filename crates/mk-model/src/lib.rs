//! Data model shared by the node lifecycle crates.
//!
//! Everything in here is plain data: cluster and node configuration, the
//! persisted host record, lifecycle events and the guest/host constants the
//! orchestrator relies on. No I/O happens in this crate.

mod domain;
pub use domain::*;

mod constants;
pub use constants::*;

mod error;
pub use error::ModelError;
