//! Node-local monitor task handling
//!
//! Holds the monitors the leader assigned to this node and keeps exactly one check
//! runner alive per assigned configuration instance.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};
use vigil_topology::NodeId;

use crate::foundation::types::{tick, until};
use crate::foundation::{MonitorConfigInstance, MonitorStatus, Timestamp};
use crate::services::probe::MonitorProbe;
use crate::services::timeline::LocalTimelineRecorder;

struct Runner {
    instance: MonitorConfigInstance,
    cancellation_token: CancellationToken,
}

/// Runs the checks of the monitors assigned to this node
pub struct MonitorTaskHandler {
    node_id: NodeId,
    recorder: Arc<LocalTimelineRecorder>,
    probe: Arc<dyn MonitorProbe>,
    runners: Mutex<HashMap<String, Runner>>,
    cancellation_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl MonitorTaskHandler {
    /// Create a handler with no assigned monitors
    pub fn new(
        node_id: NodeId,
        recorder: Arc<LocalTimelineRecorder>,
        probe: Arc<dyn MonitorProbe>,
    ) -> Self {
        Self {
            node_id,
            recorder,
            probe,
            runners: Mutex::new(HashMap::new()),
            cancellation_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Monitors this node currently checks
    pub fn assigned(&self) -> Vec<MonitorConfigInstance> {
        let mut assigned: Vec<_> = self
            .runners
            .lock()
            .values()
            .map(|runner| runner.instance.clone())
            .collect();
        assigned.sort_by(|a, b| a.id().cmp(b.id()));
        assigned
    }

    /// Replace the assigned monitors
    ///
    /// Runners whose configuration instance is no longer assigned stop; newly assigned
    /// instances get a runner. Unchanged instances keep running undisturbed.
    pub fn assign(&self, monitors: Vec<MonitorConfigInstance>) {
        if monitors.is_empty() {
            info!("Node {} was assigned no monitors, idling", self.node_id);
        } else {
            let ids: Vec<_> = monitors.iter().map(|m| m.id().to_string()).collect();
            info!("Node {} was assigned monitors: {}", self.node_id, ids.join(", "));
        }

        let mut runners = self.runners.lock();

        runners.retain(|hash, runner| {
            let keep = monitors.iter().any(|m| m.hash() == hash);
            if !keep {
                info!("Stopping check runner for monitor {}", runner.instance.id());
                runner.cancellation_token.cancel();
            }
            keep
        });

        for instance in monitors {
            if runners.contains_key(instance.hash()) {
                continue;
            }

            info!("Starting check runner for monitor {}", instance.id());
            let token = self.cancellation_token.child_token();
            let check = CheckRunner {
                instance: instance.clone(),
                recorder: self.recorder.clone(),
                probe: self.probe.clone(),
            };
            self.task_tracker.spawn(check.run(token.clone()));

            runners.insert(
                instance.hash().to_string(),
                Runner {
                    instance,
                    cancellation_token: token,
                },
            );
        }
    }

    /// Stop every runner
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        self.runners.lock().clear();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }
}

/// Checks one monitor on its schedule and reports each outcome
struct CheckRunner {
    instance: MonitorConfigInstance,
    recorder: Arc<LocalTimelineRecorder>,
    probe: Arc<dyn MonitorProbe>,
}

impl CheckRunner {
    async fn run(self, cancellation_token: CancellationToken) {
        let config = self.instance.config();
        let schedule = match config.schedule() {
            Ok(schedule) => schedule,
            Err(e) => {
                error!("Cannot run checks for monitor {}: {}", config.id, e);
                return;
            }
        };

        let mut last: Option<Timestamp> = None;
        loop {
            let now = Utc::now();
            let from = last.map_or(now, |last| now.max(last + tick()));
            let Some(check_timestamp) = schedule.next_from(from) else {
                info!("Schedule of monitor {} has no further occurrences", config.id);
                return;
            };

            if let Some(wait) = until(check_timestamp, Utc::now()) {
                tokio::select! {
                    _ = cancellation_token.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            let status = tokio::select! {
                _ = cancellation_token.cancelled() => return,
                outcome = tokio::time::timeout(config.timeout(), self.probe.check(config)) => {
                    outcome.unwrap_or(MonitorStatus::NotReachable)
                }
            };

            debug!("Check of {} at {} returned {:?}", config.id, check_timestamp, status);
            self.recorder.report(&config.id, status, check_timestamp);
            last = Some(check_timestamp);
        }
    }
}
