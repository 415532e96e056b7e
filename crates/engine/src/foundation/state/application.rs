//! Application state built from the replicated log
//!
//! Pure data: the store owns the live instance and hands out clones. Applying an entry is
//! deterministic, so every member that applies the same log ends up with equal state.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::foundation::entry::{AssignmentRecord, LogEntry, NotificationRecord, StatusRecord};
use crate::foundation::types::{AppConfiguration, MonitorId, Timestamp};

/// Result of applying one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// State changed
    Applied,
    /// Entry would break ordering or duplicates an existing record
    Rejected(&'static str),
}

/// Materialized view of the replicated log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationState {
    /// Status records per monitor, strictly increasing by check timestamp
    status: BTreeMap<MonitorId, Vec<StatusRecord>>,
    /// Assignment records per monitor, strictly increasing by timestamp
    assignments: BTreeMap<MonitorId, Vec<AssignmentRecord>>,
    /// Notifications sent so far
    notifications: Vec<NotificationRecord>,
    /// Active configuration
    configuration: AppConfiguration,
}

impl ApplicationState {
    /// Empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one committed entry
    pub fn apply(&mut self, entry: LogEntry) -> ApplyOutcome {
        match entry {
            LogEntry::Snapshot(state) => {
                *self = *state;
            }
            LogEntry::Config(configuration) => {
                if configuration.revision < self.configuration.revision {
                    return ApplyOutcome::Rejected("configuration revision is older");
                }
                self.configuration = *configuration;
            }
            LogEntry::Assignment(record) => {
                let records = self.assignments.entry(record.monitor_id.clone()).or_default();
                if records
                    .last()
                    .is_some_and(|last| last.timestamp >= record.timestamp)
                {
                    return ApplyOutcome::Rejected("assignment timestamp is not increasing");
                }
                records.push(record);
            }
            LogEntry::StatusChange(record) => {
                let records = self.status.entry(record.monitor_id.clone()).or_default();
                if records
                    .last()
                    .is_some_and(|last| last.check_timestamp >= record.check_timestamp)
                {
                    return ApplyOutcome::Rejected("status timestamp is not increasing");
                }
                records.push(record);
            }
            LogEntry::NotificationSent(record) => {
                if self.notifications.contains(&record) {
                    return ApplyOutcome::Rejected("notification already recorded");
                }
                self.notifications.push(record);
            }
        }

        ApplyOutcome::Applied
    }

    /// Active configuration
    pub fn configuration(&self) -> &AppConfiguration {
        &self.configuration
    }

    /// Status history of a monitor, oldest first
    pub fn status_history(&self, monitor_id: &MonitorId) -> &[StatusRecord] {
        self.status.get(monitor_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Most recent status record of a monitor
    pub fn latest_status(&self, monitor_id: &MonitorId) -> Option<&StatusRecord> {
        self.status_history(monitor_id).last()
    }

    /// Status in effect at `at`: the latest record checked at or before it
    pub fn status_at(&self, monitor_id: &MonitorId, at: Timestamp) -> Option<&StatusRecord> {
        self.status_history(monitor_id)
            .iter()
            .rev()
            .find(|record| record.check_timestamp <= at)
    }

    /// Every status record across monitors
    pub fn status_records(&self) -> impl Iterator<Item = &StatusRecord> {
        self.status.values().flatten()
    }

    /// Assignment history of a monitor, oldest first
    pub fn assignments(&self, monitor_id: &MonitorId) -> &[AssignmentRecord] {
        self.assignments
            .get(monitor_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Assignment currently in effect for a monitor
    pub fn latest_assignment(&self, monitor_id: &MonitorId) -> Option<&AssignmentRecord> {
        self.assignments(monitor_id).last()
    }

    /// Assignment in effect at `at`: the latest one starting at or before it
    pub fn assignment_at(
        &self,
        monitor_id: &MonitorId,
        at: Timestamp,
    ) -> Option<&AssignmentRecord> {
        self.assignments(monitor_id)
            .iter()
            .rev()
            .find(|record| record.timestamp <= at)
    }

    /// Assignments starting strictly after `after`, oldest first
    pub fn assignments_after(
        &self,
        monitor_id: &MonitorId,
        after: Timestamp,
    ) -> impl Iterator<Item = &AssignmentRecord> {
        self.assignments(monitor_id)
            .iter()
            .filter(move |record| record.timestamp > after)
    }

    /// Monitors that have at least one assignment
    pub fn assigned_monitors(&self) -> impl Iterator<Item = &MonitorId> {
        self.assignments
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(monitor_id, _)| monitor_id)
    }

    /// Notifications sent so far
    pub fn notifications(&self) -> &[NotificationRecord] {
        &self.notifications
    }

    /// Whether `provider_id` already delivered a notification for this check
    pub fn notification_sent(
        &self,
        monitor_id: &MonitorId,
        check_timestamp: Timestamp,
        provider_id: &str,
    ) -> bool {
        self.notifications.iter().any(|record| {
            &record.monitor_id == monitor_id
                && record.check_timestamp == check_timestamp
                && record.provider_id == provider_id
        })
    }

    /// Drop history older than `cutoff`
    ///
    /// Per monitor, every status record at or after `cutoff` is kept plus the newest one
    /// before it, so a status is known for every retained instant. Notifications about
    /// dropped records go with them. Assignments keep the one in effect at the oldest
    /// retained status record and everything after it.
    pub fn prune(&mut self, cutoff: Timestamp) {
        let mut retained = HashSet::new();

        for (monitor_id, records) in self.status.iter_mut() {
            let younger = records.partition_point(|record| record.check_timestamp < cutoff);
            let keep_from = younger.saturating_sub(1);
            records.drain(..keep_from);

            retained.extend(
                records
                    .iter()
                    .map(|record| (record.monitor_id.clone(), record.check_timestamp)),
            );

            let Some(oldest) = records.first().map(|record| record.check_timestamp) else {
                continue;
            };
            if let Some(assignments) = self.assignments.get_mut(monitor_id) {
                let after = assignments.partition_point(|record| record.timestamp <= oldest);
                assignments.drain(..after.saturating_sub(1));
            }
        }

        self.notifications.retain(|record| {
            retained.contains(&(record.monitor_id.clone(), record.check_timestamp))
        });
    }
}
