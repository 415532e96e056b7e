//! Local timeline recorder
//!
//! Every node keeps, per monitor it checks, a compressed history of its own observations:
//! consecutive checks with the same outcome collapse into one segment. The leader pulls
//! these timelines when analyzing, and committed status decisions let the node forget
//! everything the leader has already processed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_network::NetworkManager;
use vigil_topology::NodeId;

use crate::config::TimelineConfig;
use crate::foundation::types::tick;
use crate::foundation::{ApplicationState, MonitorId, MonitorStatus, Timestamp, TimelineSegment};
use crate::services::messages::MonitorRequest;
use crate::store::ReplicatedStateStore;

/// Records this node's check results per monitor
pub struct LocalTimelineRecorder {
    node_id: NodeId,
    config: TimelineConfig,
    timelines: Mutex<HashMap<MonitorId, Vec<TimelineSegment>>>,
    dirty: Notify,
}

impl LocalTimelineRecorder {
    /// Create an empty recorder
    pub fn new(node_id: NodeId, config: TimelineConfig) -> Self {
        Self {
            node_id,
            config,
            timelines: Mutex::new(HashMap::new()),
            dirty: Notify::new(),
        }
    }

    /// Node this recorder belongs to
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Record the outcome of the check scheduled at `check_timestamp`
    ///
    /// Returns whether the status changed, which opens a new segment.
    pub fn report(
        &self,
        monitor_id: &MonitorId,
        status: MonitorStatus,
        check_timestamp: Timestamp,
    ) -> bool {
        let previous = {
            let mut timelines = self.timelines.lock();
            let timeline = timelines
                .entry(monitor_id.clone())
                .or_insert_with(|| vec![TimelineSegment::unknown()]);

            let Some(current) = timeline.last_mut() else {
                timeline.push(TimelineSegment::unknown());
                return false;
            };

            if current.status == status {
                current.to = Some(check_timestamp);
                return false;
            }

            let previous = current.status;
            current.to = Some(check_timestamp - tick());
            timeline.push(TimelineSegment {
                status,
                from: Some(check_timestamp),
                to: Some(check_timestamp),
            });
            previous
        };

        self.dirty.notify_one();
        warn!(
            "Node {} sees monitor {} change status {:?} -> {:?}",
            self.node_id, monitor_id, previous, status
        );
        true
    }

    /// Copy of the local timeline of a monitor
    ///
    /// A monitor never observed gets a timeline holding a single `Unknown` segment.
    pub fn get(&self, monitor_id: &MonitorId) -> Vec<TimelineSegment> {
        self.timelines
            .lock()
            .entry(monitor_id.clone())
            .or_insert_with(|| vec![TimelineSegment::unknown()])
            .clone()
    }

    /// Monitors whose timeline holds at least one transition
    pub fn pending_monitors(&self) -> Vec<MonitorId> {
        let mut pending: Vec<_> = self
            .timelines
            .lock()
            .iter()
            .filter(|(_, timeline)| timeline.len() > 1)
            .map(|(monitor_id, _)| monitor_id.clone())
            .collect();
        pending.sort();
        pending
    }

    /// Forget segments the leader has already decided on
    ///
    /// Drops every segment ending at or before the latest committed status of its
    /// monitor, always keeping the most recent segment.
    pub fn collect_garbage(&self, state: &ApplicationState) {
        let mut timelines = self.timelines.lock();

        for (monitor_id, timeline) in timelines.iter_mut() {
            let Some(processed_until) = state
                .latest_status(monitor_id)
                .map(|record| record.check_timestamp)
            else {
                continue;
            };

            let before = timeline.len();
            let Some(current) = timeline.pop() else {
                continue;
            };
            timeline.retain(|segment| segment.to.is_some_and(|to| to > processed_until));
            timeline.push(current);

            if timeline.len() < before {
                debug!(
                    "Dropped {} processed segments of monitor {}",
                    before - timeline.len(),
                    monitor_id
                );
            }
        }
    }

    /// Keep the leader informed and prune processed history until cancelled
    pub async fn run(
        self: Arc<Self>,
        store: Arc<ReplicatedStateStore>,
        network: NetworkManager,
        cancellation_token: CancellationToken,
    ) {
        let applied = store.subscribe();
        let mut notify_interval = tokio::time::interval(self.config.notify_interval);
        notify_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("Timeline recorder stopped on {}", self.node_id);
                    break;
                }
                received = applied.recv_async() => {
                    if received.is_err() {
                        break;
                    }
                    self.collect_garbage(&store.snapshot());
                }
                _ = notify_interval.tick() => self.notify_leader(&network).await,
                _ = self.dirty.notified() => self.notify_leader(&network).await,
            }
        }
    }

    async fn notify_leader(&self, network: &NetworkManager) {
        let monitors = self.pending_monitors();
        if monitors.is_empty() {
            return;
        }

        let request = MonitorRequest::NotifyTimelineUpdated {
            monitors: monitors.clone(),
        };
        match network
            .request_leader(request, self.config.request_timeout)
            .await
        {
            Ok(_) => debug!("Notified leader about {} updated timelines", monitors.len()),
            Err(e) => debug!("Could not notify leader about updated timelines: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::{LogEntry, StatusRecord};
    use chrono::{TimeDelta, TimeZone, Utc};

    fn at(second: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap() + TimeDelta::seconds(second)
    }

    fn recorder() -> LocalTimelineRecorder {
        LocalTimelineRecorder::new(NodeId::from_seed(1), TimelineConfig::default())
    }

    #[test]
    fn test_timeline_starts_unknown() {
        let recorder = recorder();
        assert_eq!(
            recorder.get(&MonitorId::new("web")),
            vec![TimelineSegment::unknown()]
        );
        assert!(recorder.pending_monitors().is_empty());
    }

    #[test]
    fn test_equal_status_extends_segment() {
        let recorder = recorder();
        let web = MonitorId::new("web");

        assert!(recorder.report(&web, MonitorStatus::Reachable, at(10)));
        assert!(!recorder.report(&web, MonitorStatus::Reachable, at(20)));
        assert!(!recorder.report(&web, MonitorStatus::Reachable, at(30)));

        let timeline = recorder.get(&web);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].to, Some(at(10) - tick()));
        assert_eq!(timeline[1].from, Some(at(10)));
        assert_eq!(timeline[1].to, Some(at(30)));
        assert!(timeline[1].covers(at(20)));
    }

    #[test]
    fn test_status_change_closes_segment_one_tick_early() {
        let recorder = recorder();
        let web = MonitorId::new("web");

        recorder.report(&web, MonitorStatus::Reachable, at(10));
        recorder.report(&web, MonitorStatus::Reachable, at(20));
        assert!(recorder.report(&web, MonitorStatus::NotReachable, at(30)));

        let timeline = recorder.get(&web);
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline[1].to, Some(at(30) - tick()));
        assert_eq!(timeline[2].status, MonitorStatus::NotReachable);
        assert_eq!(timeline[2].from, Some(at(30)));
        assert_eq!(recorder.pending_monitors(), vec![web]);
    }

    #[test]
    fn test_garbage_collection_keeps_latest_segment() {
        let recorder = recorder();
        let web = MonitorId::new("web");
        recorder.report(&web, MonitorStatus::Reachable, at(10));
        recorder.report(&web, MonitorStatus::NotReachable, at(20));
        recorder.report(&web, MonitorStatus::Reachable, at(30));

        let mut state = ApplicationState::new();
        state.apply(LogEntry::StatusChange(StatusRecord {
            monitor_id: web.clone(),
            status: MonitorStatus::NotReachable,
            check_timestamp: at(25),
            redundant: false,
        }));
        recorder.collect_garbage(&state);

        let timeline = recorder.get(&web);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].from, Some(at(20)));

        state.apply(LogEntry::StatusChange(StatusRecord {
            monitor_id: web.clone(),
            status: MonitorStatus::Reachable,
            check_timestamp: at(40),
            redundant: false,
        }));
        recorder.collect_garbage(&state);

        let timeline = recorder.get(&web);
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].status, MonitorStatus::Reachable);
        assert!(recorder.pending_monitors().is_empty());
    }
}
