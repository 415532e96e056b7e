//! Shared consensus types

use vigil_topology::{Node, NodeId};

/// Position of an entry in the replicated log, starting at 1
pub type LogIndex = u64;

/// Events published to subscribers of a node's consensus handle
///
/// `EntryCommitted` is only published after the local `StateMachine` has applied the
/// entry, so subscribers always observe state that already includes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// Leadership moved; `None` when no leader is known
    LeaderChanged(Option<NodeId>),
    /// A member joined the cluster
    MemberJoined(Node),
    /// A member left the cluster
    MemberLeft(NodeId),
    /// A member's availability changed
    AvailabilityChanged(Node),
    /// The entry at this index was applied locally
    EntryCommitted(LogIndex),
}
