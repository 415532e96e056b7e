//! Foundation module containing core types
//!
//! Domain types, log entries and the materialized application state. It has no
//! dependencies on the service layer.

pub mod entry;
pub mod state;
pub mod types;

pub use entry::{AssignmentRecord, LogEntry, NotificationRecord, StatusRecord};
pub use state::{ApplicationState, ApplyOutcome};
pub use types::{
    AppConfiguration, CheckSchedule, MonitorConfigInstance, MonitorConfiguration, MonitorId,
    MonitorStatus, Timestamp, TimelineSegment,
};
