//! Log compaction
//!
//! Replays a prefix of the log into a fresh state, prunes old history and encodes the
//! result as a single snapshot entry.

use bytes::Bytes;
use tracing::{debug, warn};
use vigil_consensus::LogIndex;

use crate::error::EngineResult;
use crate::foundation::{ApplicationState, ApplyOutcome, LogEntry, Timestamp};

/// Build a snapshot entry equivalent to `entries`, keeping history from `cutoff` on
pub fn build_snapshot(entries: &[(LogIndex, Bytes)], cutoff: Timestamp) -> EngineResult<Bytes> {
    let mut state = ApplicationState::new();

    for (index, payload) in entries {
        match LogEntry::decode(payload) {
            Ok(entry) => {
                if let ApplyOutcome::Rejected(reason) = state.apply(entry) {
                    debug!("Compaction skipped entry {}: {}", index, reason);
                }
            }
            Err(e) => warn!("Compaction dropped malformed entry {}: {}", index, e),
        }
    }

    state.prune(cutoff);
    LogEntry::Snapshot(Box::new(state)).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::{MonitorId, MonitorStatus, StatusRecord};
    use chrono::{TimeDelta, Utc};

    #[test]
    fn test_snapshot_skips_malformed_entries() {
        let now = Utc::now();
        let record = StatusRecord {
            monitor_id: MonitorId::new("web"),
            status: MonitorStatus::Reachable,
            check_timestamp: now,
            redundant: false,
        };
        let entries = vec![
            (1, Bytes::from_static(b"not cbor")),
            (2, LogEntry::StatusChange(record.clone()).encode().unwrap()),
        ];

        let snapshot = build_snapshot(&entries, now - TimeDelta::days(1)).unwrap();
        let LogEntry::Snapshot(state) = LogEntry::decode(&snapshot).unwrap() else {
            panic!("expected snapshot entry");
        };
        assert_eq!(state.status_history(&record.monitor_id), &[record]);
    }
}
