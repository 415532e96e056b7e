//! Peer RPC vocabulary of the monitoring service

use serde::{Deserialize, Serialize};
use vigil_network::ServiceMessage;
use vigil_topology::NodeId;

use crate::foundation::{
    AppConfiguration, MonitorConfigInstance, MonitorId, Timestamp, TimelineSegment,
};

/// Requests exchanged between monitoring nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MonitorRequest {
    /// Replace the receiver's assigned monitors
    AssignMonitors {
        /// Node the assignment is meant for
        node_id: NodeId,
        /// Full list of monitors the node must check
        monitors: Vec<MonitorConfigInstance>,
        /// Timestamp of the distribution pass
        timestamp: Timestamp,
    },
    /// Ask a node which monitors it currently checks
    GetAssignedMonitors,
    /// Fetch a node's local timeline of a monitor
    GetTimeline {
        /// Monitor whose timeline is requested
        monitor_id: MonitorId,
    },
    /// Tell the leader these monitors have unprocessed transitions (leader-bound)
    NotifyTimelineUpdated {
        /// Monitors with pending observations
        monitors: Vec<MonitorId>,
    },
    /// Propose a new configuration (leader-bound)
    ProposeConfiguration {
        /// Proposed configuration
        config: Box<AppConfiguration>,
        /// Accept a proposal whose revision equals the active one
        force_on_equal_revision: bool,
    },
}

/// Responses to [`MonitorRequest`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MonitorResponse {
    /// Request handled
    Ack,
    /// Monitors the node currently checks
    AssignedMonitors(Vec<MonitorConfigInstance>),
    /// A node's local timeline, oldest segment first
    Timeline(Vec<TimelineSegment>),
    /// Configuration written to the log
    ConfigurationAccepted {
        /// Revision now active
        revision: u64,
    },
    /// Configuration not written because an equal or newer revision is active
    ConfigurationDismissed {
        /// Why the proposal was dismissed
        reason: String,
    },
    /// Configuration failed validation
    ConfigurationRejected {
        /// Validation failure
        reason: String,
    },
}

impl ServiceMessage for MonitorRequest {
    type Response = MonitorResponse;

    fn service_id() -> &'static str {
        "monitor"
    }
}
