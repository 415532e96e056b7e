//! Time-related types

use chrono::{DateTime, TimeDelta, Utc};

/// Wall-clock instant used for check timestamps and log entries
pub type Timestamp = DateTime<Utc>;

/// Smallest representable step between two timestamps
pub fn tick() -> TimeDelta {
    TimeDelta::nanoseconds(1)
}

/// Convert a std duration into a chrono delta, saturating on overflow
pub fn to_delta(duration: std::time::Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Time left until `instant`, or `None` if it has passed
pub fn until(instant: Timestamp, now: Timestamp) -> Option<std::time::Duration> {
    (instant - now).to_std().ok().filter(|left| !left.is_zero())
}
