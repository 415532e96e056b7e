//! Local timeline segments

use serde::{Deserialize, Serialize};

use crate::foundation::types::{MonitorStatus, Timestamp};

/// A span of consecutive checks that all observed the same status
///
/// The initial segment of a timeline is `Unknown` with neither bound set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineSegment {
    /// Observed status
    pub status: MonitorStatus,
    /// Timestamp of the first check in this segment
    pub from: Option<Timestamp>,
    /// Timestamp of the last check in this segment
    pub to: Option<Timestamp>,
}

impl TimelineSegment {
    /// The open `Unknown` segment every timeline starts with
    pub fn unknown() -> Self {
        Self {
            status: MonitorStatus::Unknown,
            from: None,
            to: None,
        }
    }

    /// Whether the check scheduled at `at` falls inside this segment
    ///
    /// Segments without both bounds cover nothing.
    pub fn covers(&self, at: Timestamp) -> bool {
        matches!((self.from, self.to), (Some(from), Some(to)) if from <= at && at <= to)
    }
}
