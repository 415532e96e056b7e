//! Consensus traits consumed by the engine

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use vigil_topology::{Node, NodeId};

use crate::error::ConsensusResult;
use crate::types::{ClusterEvent, LogIndex};

/// Applies committed log entries to a materialized state
///
/// Entries are delivered exactly once each, strictly in commit order, including the full
/// replay performed when a node joins or restarts.
pub trait StateMachine: Send + Sync + 'static {
    /// Apply one committed payload
    ///
    /// Must not fail: payloads that cannot be interpreted are dropped by the implementation.
    fn apply(&self, index: LogIndex, payload: &Bytes);

    /// Build a single snapshot payload equivalent to `entries` (oldest first)
    ///
    /// Returning `None` skips this compaction round.
    fn compact(&self, entries: &[(LogIndex, Bytes)]) -> Option<Bytes>;

    /// Log length above which the leader compacts, when the state machine sets one
    ///
    /// `None` leaves the decision to the log implementation.
    fn compaction_threshold(&self) -> Option<usize> {
        None
    }
}

/// Handle to the replicated log held by one cluster member
#[async_trait]
pub trait ConsensusLog: Send + Sync + 'static {
    /// ID of the member owning this handle
    fn local_node_id(&self) -> &NodeId;

    /// All known members with their leader flag and availability
    fn nodes(&self) -> Vec<Node>;

    /// Current leader, if any
    fn leader(&self) -> Option<NodeId>;

    /// Whether the local member is the leader
    fn is_leader(&self) -> bool {
        self.leader().as_ref() == Some(self.local_node_id())
    }

    /// Subscribe to cluster events
    fn subscribe(&self) -> flume::Receiver<ClusterEvent>;

    /// Append `payload` to the log
    ///
    /// Returns `Ok(true)` once the entry is committed and applied locally, `Ok(false)`
    /// when the write was rejected (not leader, lost leadership). A rejected caller must
    /// re-derive its entry from current state rather than resubmit blindly.
    async fn write(&self, payload: Bytes) -> ConsensusResult<bool>;

    /// Highest index applied by the local state machine
    fn applied_index(&self) -> LogIndex;

    /// Wait until the local state machine has applied `index`
    async fn wait_for_applied(&self, index: LogIndex, timeout: Duration) -> ConsensusResult<()>;
}
