//! Node identifier

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a cluster member, expressed as its peer endpoint
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node ID from an endpoint string
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self(endpoint.into())
    }

    /// Deterministic node ID for tests and local clusters
    pub fn from_seed(seed: u8) -> Self {
        Self(format!("node-{seed}"))
    }

    /// Get the endpoint this ID refers to
    pub fn endpoint(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(endpoint: &str) -> Self {
        Self::new(endpoint)
    }
}
