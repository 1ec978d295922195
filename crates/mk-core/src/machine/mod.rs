//! Node lifecycle: lock, create-or-fix, post-start setup, persistence.

mod assets;
mod post_start;
mod start;

pub use post_start::add_host_alias;

use std::{fmt, sync::Arc};

use mk_model::{Event, EventKind, MachineName, Node};

use crate::{
    api::MachineApi,
    config::OrchestratorConfig,
    error::{CoreError, ErrorKind},
    events::EventBus,
    host::Host,
};

/// Result of a successful [`Orchestrator::start_host`].
#[derive(Debug)]
pub struct ProvisionOutcome {
    pub host: Host,
    /// The host record existed before this call (fix path).
    pub existed: bool,
    /// The node with its learned address.
    pub node: Node,
}

/// Failed start.
///
/// `host` is set when the unit was created or loaded before the failure, so the caller
/// can inspect or clean it up.
#[derive(Debug)]
pub struct StartHostError {
    pub host: Option<Host>,
    pub existed: bool,
    pub error: CoreError,
}

impl StartHostError {
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl fmt::Display for StartHostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for StartHostError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Internal failure of one path, before `existed` is known to the caller.
struct Failed {
    host: Option<Host>,
    error: CoreError,
}

impl Failed {
    fn with_host(host: &Host, error: CoreError) -> Self {
        Self {
            host: Some(host.clone()),
            error,
        }
    }
}

impl From<CoreError> for Failed {
    fn from(error: CoreError) -> Self {
        Self { host: None, error }
    }
}

/// Drives hosts through their lifecycle.
///
/// All state lives in the explicit [`MachineApi`], [`OrchestratorConfig`] and [`EventBus`]
/// values; two orchestrators sharing a home directory coordinate only through the
/// machine lock.
pub struct Orchestrator {
    api: Arc<MachineApi>,
    config: OrchestratorConfig,
    events: EventBus,
}

impl Orchestrator {
    pub fn new(api: Arc<MachineApi>, config: OrchestratorConfig) -> Self {
        Self {
            api,
            config,
            events: EventBus::default(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    #[inline]
    pub fn api(&self) -> &MachineApi {
        &self.api
    }

    #[inline]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    #[inline]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    async fn emit(&self, kind: EventKind, machine: &MachineName) {
        self.events
            .publish(Event::new(kind).with_machine(machine.as_str()))
            .await;
    }
}
