mod cluster;
pub use cluster::{ClusterConfig, KubernetesConfig};

mod node;
pub use node::Node;

mod machine;
pub use machine::MachineName;

mod driver_kind;
pub use driver_kind::DriverKind;

mod env;
pub use env::{EngineEnv, dedup};

mod host;
pub use host::{AuthOptions, EngineOptions, HostRecord};

mod event;
pub use event::{Event, EventKind};

/// Timeout value in milliseconds.
pub type TimeoutMs = u64;
