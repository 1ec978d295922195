use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("cluster name is empty")]
    EmptyName,
    #[error("cluster name {0:?} has the shape of a worker machine name")]
    AmbiguousClusterName(String),
    #[error("cluster has no nodes")]
    NoNodes,
    #[error("cluster must have exactly one control-plane node, found {0}")]
    ControlPlaneCount(usize),
    #[error("invalid node name {0:?} (expected m<digits> for worker nodes)")]
    InvalidNodeName(String),
    #[error("unknown driver kind: {0}")]
    UnknownDriverKind(String),
}
