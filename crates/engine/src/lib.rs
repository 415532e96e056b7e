//! Clustered uptime monitoring on top of a replicated log
//!
//! Every node of a cluster runs the same [`MonitorNode`]:
//! - the `ReplicatedStateStore` materializes the committed log into application state
//! - the leader's `TaskDistributor` decides which nodes check which monitors
//! - each node records its own check results in a `LocalTimelineRecorder`
//! - the leader's `TimelineQuorumAnalyzer` turns those observations into committed
//!   status decisions by threshold vote

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::result_large_err)]

/// Builder for monitoring nodes
pub mod builder;

/// Configuration types
pub mod config;

/// Error types
pub mod error;

/// Domain types, log entries and application state
pub mod foundation;

/// Cluster member wiring
pub mod node;

/// Services
pub mod services;

/// Replicated state store
pub mod store;

pub use {
    builder::MonitorNodeBuilder,
    config::EngineConfig,
    error::{EngineResult, Error, ErrorKind},
    foundation::{
        AppConfiguration, ApplicationState, LogEntry, MonitorConfigInstance,
        MonitorConfiguration, MonitorId, MonitorStatus, StatusRecord, TimelineSegment,
    },
    node::{MonitorNode, NodeState},
    services::{EligibilityPredicate, MonitorProbe, NotificationProvider, ProposalOutcome},
    store::ReplicatedStateStore,
};
