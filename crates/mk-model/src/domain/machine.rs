use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ClusterConfig, Node};

/// Deterministic identifier of the backend unit hosting one node.
///
/// Used both as the cross-process lock key and as the backend lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineName(String);

impl MachineName {
    /// The cluster name for single-node clusters and the control plane, `<cluster>-<node>` otherwise.
    pub fn for_node(cc: &ClusterConfig, node: &Node) -> Self {
        if cc.nodes.len() == 1 || node.control_plane {
            return Self(cc.name.clone());
        }
        Self(format!("{}-{}", cc.name, node.name))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MachineName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MachineName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MachineName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(name: &str, workers: usize) -> ClusterConfig {
        let mut cc = ClusterConfig {
            name: name.to_string(),
            ..Default::default()
        };
        for i in 0..workers {
            cc.nodes.push(Node::worker(i + 2));
        }
        cc
    }

    #[test]
    fn single_node_uses_cluster_name() {
        let cc = cluster("minikube", 0);
        let name = MachineName::for_node(&cc, &cc.nodes[0]);
        assert_eq!(name.as_str(), "minikube");
    }

    #[test]
    fn worker_gets_suffixed_name() {
        let cc = cluster("dev", 2);
        assert_eq!(MachineName::for_node(&cc, &cc.nodes[0]).as_str(), "dev");
        assert_eq!(MachineName::for_node(&cc, &cc.nodes[1]).as_str(), "dev-m02");
        assert_eq!(MachineName::for_node(&cc, &cc.nodes[2]).as_str(), "dev-m03");
    }

    #[test]
    fn stable_across_calls() {
        let cc = cluster("dev", 1);
        let a = MachineName::for_node(&cc, &cc.nodes[1]);
        let b = MachineName::for_node(&cc.clone(), &cc.nodes[1].clone());
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_valid_clusters_do_not_collide() {
        let clusters = [cluster("a", 2), cluster("a-b", 2), cluster("b", 1)];
        let mut names = Vec::new();
        for cc in &clusters {
            assert!(cc.validate().is_ok());
            for n in &cc.nodes {
                names.push(MachineName::for_node(cc, n));
            }
        }
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
