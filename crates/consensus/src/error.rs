//! Error types for the consensus layer

use std::time::Duration;

use thiserror::Error;
use vigil_topology::NodeId;

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Consensus operation errors
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// Log storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Node is not a member of the cluster
    #[error("Node {0} is not a cluster member")]
    NotMember(Box<NodeId>),

    /// Operation did not complete in time
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The cluster is shutting down
    #[error("Consensus is shutting down")]
    Shutdown,
}
