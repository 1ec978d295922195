pub mod error;
pub use error::{CoreError, ErrorKind, ResultExt};

pub mod config;
pub use config::{OrchestratorConfig, proxy_env_from_process};

pub mod localpath;
pub use localpath::MiniPath;

pub mod lock;
pub use lock::{LockSpec, MachineLock};

pub mod events;
pub use events::{EventBus, Subscribe};

pub mod group;
pub use group::{GroupReport, TaskFailure, TaskGroup};

pub mod runner;
pub use runner::{Cmd, CommandRunner, FileAsset, RunResult, RunnerError};

pub mod driver;
pub use driver::{
    ConfigContext, Driver, DriverDef, DriverError, DriverRegistry, DriverStatus, Priority,
    UnitInfo, UnitState,
};

pub mod store;
pub use store::{FileHostStore, HostStore, StoreError};

mod host;
pub use host::Host;

mod api;
pub use api::MachineApi;

pub mod machine;
pub use machine::{Orchestrator, ProvisionOutcome, StartHostError, add_host_alias};

pub mod system;
