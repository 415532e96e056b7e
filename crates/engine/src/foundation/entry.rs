//! Replicated log entries
//!
//! Every change to the application state travels through the consensus log as one of
//! these entries. Entries are immutable once committed and encoded with CBOR.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use vigil_topology::NodeId;

use crate::error::{EngineResult, Error};
use crate::foundation::state::ApplicationState;
use crate::foundation::types::{
    AppConfiguration, MonitorConfigInstance, MonitorId, MonitorStatus, Timestamp,
};

/// An authoritative status decision for one check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Monitor the decision is about
    pub monitor_id: MonitorId,
    /// Decided status
    pub status: MonitorStatus,
    /// Scheduled timestamp of the check
    pub check_timestamp: Timestamp,
    /// Same status as the previous record; informational only
    pub redundant: bool,
}

/// The set of nodes responsible for a monitor from `timestamp` on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    /// Monitor being assigned
    pub monitor_id: MonitorId,
    /// Nodes checking the monitor; empty only when no node is available
    pub nodes: Vec<NodeId>,
    /// Start of this assignment epoch
    pub timestamp: Timestamp,
    /// Configuration in effect for the epoch
    pub config: MonitorConfigInstance,
}

/// A notification delivered by a provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Monitor the notification was about
    pub monitor_id: MonitorId,
    /// Check timestamp of the status record that triggered it
    pub check_timestamp: Timestamp,
    /// Provider that delivered it
    pub provider_id: String,
}

/// Entry in the replicated log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LogEntry {
    /// Full state, replacing everything applied before
    Snapshot(Box<ApplicationState>),
    /// New application configuration
    Config(Box<AppConfiguration>),
    /// New assignment epoch for a monitor
    Assignment(AssignmentRecord),
    /// New authoritative status
    StatusChange(StatusRecord),
    /// A notification was sent
    NotificationSent(NotificationRecord),
}

impl LogEntry {
    /// Short name of the entry type, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            LogEntry::Snapshot(_) => "snapshot",
            LogEntry::Config(_) => "config",
            LogEntry::Assignment(_) => "assignment",
            LogEntry::StatusChange(_) => "status_change",
            LogEntry::NotificationSent(_) => "notification_sent",
        }
    }

    /// Encode for the consensus log
    pub fn encode(&self) -> EngineResult<Bytes> {
        let mut buffer = Vec::new();
        ciborium::into_writer(self, &mut buffer)
            .map_err(|e| Error::storage(format!("Failed to encode {} entry: {}", self.kind(), e)))?;
        Ok(Bytes::from(buffer))
    }

    /// Decode an entry read from the consensus log
    pub fn decode(payload: &[u8]) -> EngineResult<Self> {
        ciborium::from_reader(payload)
            .map_err(|e| Error::storage(format!("Failed to decode log entry: {e}")))
    }
}
