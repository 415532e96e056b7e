//! Cluster member as seen by the local node

use serde::{Deserialize, Serialize};

use crate::NodeId;

/// Availability of a cluster member as reported by the consensus layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeAvailability {
    /// No information yet
    #[default]
    Unknown,
    /// Member is reachable and participating
    Available,
    /// Member is known but not reachable
    Unavailable,
}

impl NodeAvailability {
    /// Whether work may be scheduled on a member in this state
    pub fn is_available(&self) -> bool {
        matches!(self, NodeAvailability::Available)
    }
}

/// A cluster member: endpoint identity, leader flag and availability
///
/// Never persisted; rebuilt from consensus membership events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    node_id: NodeId,
    is_leader: bool,
    availability: NodeAvailability,
}

impl Node {
    /// Create a new node
    pub fn new(node_id: NodeId, is_leader: bool, availability: NodeAvailability) -> Self {
        Self {
            node_id,
            is_leader,
            availability,
        }
    }

    /// Get the node ID of this node
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Whether this node currently leads the cluster
    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    /// Current availability
    pub fn availability(&self) -> NodeAvailability {
        self.availability
    }

    /// Shorthand for `availability().is_available()`
    pub fn is_available(&self) -> bool {
        self.availability.is_available()
    }
}
