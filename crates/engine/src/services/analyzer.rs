//! Timeline quorum analyzer
//!
//! Runs on the leader. For each monitor it walks the scheduled check timestamps after
//! the last committed status, collects the local timelines of the nodes that were
//! assigned at each instant and commits the quorum decision for every timestamp that
//! at least one node has observed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use vigil_consensus::{ClusterEvent, ConsensusLog};
use vigil_network::NetworkManager;
use vigil_topology::NodeId;

use crate::config::AnalyzerConfig;
use crate::error::{EngineResult, Error};
use crate::foundation::types::{tick, to_delta, until};
use crate::foundation::{
    ApplicationState, AssignmentRecord, LogEntry, MonitorId, MonitorStatus, StatusRecord,
    Timestamp, TimelineSegment,
};
use crate::services::messages::{MonitorRequest, MonitorResponse};
use crate::store::ReplicatedStateStore;

type Timelines = HashMap<NodeId, Vec<TimelineSegment>>;

/// Classify a vote by its reachable fraction
///
/// Both thresholds are inclusive. Returns `None` when nobody voted.
pub fn classify(
    reachable_votes: usize,
    total_votes: usize,
    available_threshold: f64,
    partial_threshold: f64,
) -> Option<MonitorStatus> {
    if total_votes == 0 {
        return None;
    }

    let fraction = reachable_votes as f64 / total_votes as f64;
    let status = if fraction >= available_threshold {
        MonitorStatus::Reachable
    } else if fraction >= partial_threshold {
        MonitorStatus::PartiallyReachable
    } else {
        MonitorStatus::NotReachable
    };
    Some(status)
}

/// Count `(reachable, total)` votes at `at`; nodes without a covering segment abstain
fn tally(timelines: &Timelines, at: Timestamp) -> (usize, usize) {
    let mut reachable = 0;
    let mut total = 0;

    for timeline in timelines.values() {
        match timeline.iter().find(|segment| segment.covers(at)) {
            Some(segment) if segment.status == MonitorStatus::Reachable => {
                reachable += 1;
                total += 1;
            }
            Some(segment) if segment.status == MonitorStatus::NotReachable => total += 1,
            _ => {}
        }
    }

    (reachable, total)
}

/// Assignment epochs to walk, oldest first
///
/// Starts with the assignment in effect at `processed_until`. Without one, falls back
/// to the earliest known assignment, which may start after `processed_until`.
pub(crate) fn epochs(
    state: &ApplicationState,
    monitor_id: &MonitorId,
    processed_until: Option<Timestamp>,
) -> Vec<AssignmentRecord> {
    let Some(processed_until) = processed_until else {
        return state.assignments(monitor_id).to_vec();
    };

    let first = match state.assignment_at(monitor_id, processed_until) {
        Some(first) => first,
        None => {
            let Some(earliest) = state.assignments(monitor_id).first() else {
                return Vec::new();
            };
            warn!(
                "No assignment of monitor {} in effect at {}, starting from the earliest one",
                monitor_id, processed_until
            );
            earliest
        }
    };

    let mut epochs = vec![first.clone()];
    epochs.extend(
        state
            .assignments_after(monitor_id, processed_until)
            .filter(|record| record.timestamp > first.timestamp)
            .cloned(),
    );
    epochs
}

/// Frees a monitor's analysis slot when its task ends, even by panic
struct ActiveSlot<'a> {
    analyzer: &'a TimelineQuorumAnalyzer,
    monitor_id: &'a MonitorId,
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.analyzer.active.lock().remove(self.monitor_id);
    }
}

/// Reconciles per-node observations into committed status decisions
pub struct TimelineQuorumAnalyzer {
    node_id: NodeId,
    config: AnalyzerConfig,
    store: Arc<ReplicatedStateStore>,
    consensus: Arc<dyn ConsensusLog>,
    network: NetworkManager,
    active: Mutex<HashSet<MonitorId>>,
    term: Mutex<CancellationToken>,
    task_tracker: TaskTracker,
}

impl TimelineQuorumAnalyzer {
    /// Create an analyzer
    pub fn new(
        config: AnalyzerConfig,
        store: Arc<ReplicatedStateStore>,
        consensus: Arc<dyn ConsensusLog>,
        network: NetworkManager,
    ) -> Self {
        Self {
            node_id: consensus.local_node_id().clone(),
            config,
            store,
            consensus,
            network,
            active: Mutex::new(HashSet::new()),
            term: Mutex::new(CancellationToken::new()),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Start an analysis for every monitor that has none running
    ///
    /// Ignored on non-leaders. Returns how many analyses were started.
    pub fn trigger(self: &Arc<Self>, monitor_ids: impl IntoIterator<Item = MonitorId>) -> usize {
        if !self.consensus.is_leader() {
            debug!("Ignoring analysis trigger on non-leader {}", self.node_id);
            return 0;
        }

        let term = self.term.lock().clone();
        let mut started = 0;

        for monitor_id in monitor_ids {
            if !self.active.lock().insert(monitor_id.clone()) {
                debug!("Analysis of monitor {} already running", monitor_id);
                continue;
            }

            let analyzer = self.clone();
            let token = term.child_token();
            self.task_tracker.spawn(async move {
                let _slot = ActiveSlot {
                    analyzer: &analyzer,
                    monitor_id: &monitor_id,
                };
                match analyzer.analyze(&monitor_id, &token).await {
                    Ok(0) => {}
                    Ok(committed) => {
                        debug!("Committed {} statuses for monitor {}", committed, monitor_id)
                    }
                    Err(e) if e.is_cancelled() => {
                        debug!("Analysis of monitor {} cancelled", monitor_id)
                    }
                    Err(e) => error!("Failed to analyze timeline of monitor {}: {}", monitor_id, e),
                }
            });
            started += 1;
        }

        started
    }

    /// Whether an analysis of `monitor_id` is running
    pub fn is_analyzing(&self, monitor_id: &MonitorId) -> bool {
        self.active.lock().contains(monitor_id)
    }

    /// Analyze every monitor that has an assignment
    pub fn sweep(self: &Arc<Self>) -> usize {
        let state = self.store.snapshot();
        let monitor_ids: Vec<_> = state.assigned_monitors().cloned().collect();
        self.trigger(monitor_ids)
    }

    /// Sweep periodically and follow leadership until cancelled
    pub async fn run(self: Arc<Self>, cancellation_token: CancellationToken) {
        let events = self.consensus.subscribe();
        let mut sweep_interval = tokio::time::interval(self.config.sweep_interval);
        sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    self.term.lock().cancel();
                    info!("Timeline analyzer stopped on {}", self.node_id);
                    break;
                }
                event = events.recv_async() => match event {
                    Ok(ClusterEvent::LeaderChanged(leader))
                        if leader.as_ref() != Some(&self.node_id) =>
                    {
                        self.step_down();
                    }
                    Ok(_) => {}
                    Err(_) => break,
                },
                _ = sweep_interval.tick() => {
                    if self.consensus.is_leader() {
                        self.sweep();
                    }
                }
            }
        }
    }

    /// Wait for running analyses to finish
    pub async fn shutdown(&self) {
        self.term.lock().cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }

    fn step_down(&self) {
        let mut term = self.term.lock();
        term.cancel();
        *term = CancellationToken::new();
        debug!("Analyzer on {} cancelled analyses after losing leadership", self.node_id);
    }

    /// Commit decisions for every pending check of one monitor
    ///
    /// Returns the number of status records written.
    pub async fn analyze(
        &self,
        monitor_id: &MonitorId,
        cancellation_token: &CancellationToken,
    ) -> EngineResult<usize> {
        let state = self.store.snapshot();
        let latest = state.latest_status(monitor_id);
        let processed_until = latest.map(|record| record.check_timestamp);
        let mut last_status = latest.map(|record| record.status);

        let epochs = epochs(&state, monitor_id, processed_until);
        let mut committed = 0;

        for (index, epoch) in epochs.iter().enumerate() {
            let end = epochs.get(index + 1).map(|next| next.timestamp);
            let config = epoch.config.config();
            let schedule = match config.schedule() {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!("Skipping epoch of monitor {}: {}", monitor_id, e);
                    continue;
                }
            };

            let mut timelines = self.fetch_timelines(&epoch.nodes, monitor_id).await;
            let mut cursor = match processed_until {
                Some(processed_until) => epoch.timestamp.max(processed_until + tick()),
                None => epoch.timestamp,
            };

            loop {
                if cancellation_token.is_cancelled() {
                    return Err(Error::cancelled(format!("Analysis of monitor {monitor_id}")));
                }

                let Some(check_timestamp) = schedule.next_from(cursor) else {
                    break;
                };
                if check_timestamp > Utc::now() || end.is_some_and(|end| check_timestamp >= end) {
                    break;
                }
                cursor = check_timestamp + tick();

                let observed = timelines
                    .values()
                    .any(|timeline| timeline.iter().any(|s| s.covers(check_timestamp)));
                if !observed {
                    continue;
                }

                self.await_observers(
                    epoch,
                    monitor_id,
                    check_timestamp,
                    &mut timelines,
                    cancellation_token,
                )
                .await?;

                let (reachable, total) = tally(&timelines, check_timestamp);
                let Some(status) = classify(
                    reachable,
                    total,
                    config.available_threshold,
                    config.partial_threshold,
                ) else {
                    debug!("No votes for monitor {} at {}", monitor_id, check_timestamp);
                    continue;
                };

                debug!(
                    "Check of {} at {}: {} of {} observers saw it reachable",
                    monitor_id, check_timestamp, reachable, total
                );

                let redundant = last_status == Some(status);
                if !redundant {
                    warn!(
                        "Monitor {} is now {:?} (was {:?})",
                        monitor_id,
                        status,
                        last_status.unwrap_or_default()
                    );
                }

                let entry = LogEntry::StatusChange(StatusRecord {
                    monitor_id: monitor_id.clone(),
                    status,
                    check_timestamp,
                    redundant,
                });
                if !self.consensus.write(entry.encode()?).await? {
                    return Err(Error::not_leader(
                        "Lost leadership while committing status",
                        self.consensus.leader(),
                    ));
                }

                last_status = Some(status);
                committed += 1;
            }
        }

        Ok(committed)
    }

    async fn fetch_timeline(
        &self,
        node_id: &NodeId,
        monitor_id: &MonitorId,
    ) -> EngineResult<Vec<TimelineSegment>> {
        let request = MonitorRequest::GetTimeline {
            monitor_id: monitor_id.clone(),
        };
        match self
            .network
            .request(node_id, request, self.config.request_timeout)
            .await?
        {
            MonitorResponse::Timeline(timeline) => Ok(timeline),
            other => Err(Error::network(format!(
                "Unexpected response to timeline request: {other:?}"
            ))),
        }
    }

    async fn fetch_timelines(&self, nodes: &[NodeId], monitor_id: &MonitorId) -> Timelines {
        let requests = nodes.iter().map(|node_id| async move {
            let result = self.fetch_timeline(node_id, monitor_id).await;
            (node_id, result)
        });

        join_all(requests)
            .await
            .into_iter()
            .filter_map(|(node_id, result)| match result {
                Ok(timeline) => Some((node_id.clone(), timeline)),
                Err(e) => {
                    debug!("Timeline of {} from {} unavailable: {}", monitor_id, node_id, e);
                    None
                }
            })
            .collect()
    }

    /// Poll assigned nodes that have not yet recorded `check_timestamp`
    ///
    /// Waits at most until the check's timeout plus the wait buffer has passed; checks
    /// that are already that old are decided with the timelines at hand.
    async fn await_observers(
        &self,
        epoch: &AssignmentRecord,
        monitor_id: &MonitorId,
        check_timestamp: Timestamp,
        timelines: &mut Timelines,
        cancellation_token: &CancellationToken,
    ) -> EngineResult<()> {
        // An unrepresentable deadline counts as already passed
        let Some(remaining) = check_timestamp
            .checked_add_signed(to_delta(epoch.config.config().timeout()))
            .and_then(|at| at.checked_add_signed(to_delta(self.config.wait_buffer)))
            .and_then(|deadline| until(deadline, Utc::now()))
        else {
            return Ok(());
        };

        let covers = |timeline: &Vec<TimelineSegment>| {
            timeline.iter().any(|segment| segment.covers(check_timestamp))
        };
        let missing: Vec<_> = epoch
            .nodes
            .iter()
            .filter(|node_id| !timelines.get(*node_id).is_some_and(covers))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let polls = missing.into_iter().map(|node_id| async move {
            let poll = async {
                loop {
                    match self.fetch_timeline(node_id, monitor_id).await {
                        Ok(timeline) if covers(&timeline) => return timeline,
                        Ok(_) => debug!(
                            "Waiting for {} to record check of {} at {}",
                            node_id, monitor_id, check_timestamp
                        ),
                        Err(e) => debug!("Polling {} failed: {}", node_id, e),
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            };

            tokio::time::timeout(remaining, poll)
                .await
                .ok()
                .map(|timeline| (node_id.clone(), timeline))
        });

        let results = tokio::select! {
            _ = cancellation_token.cancelled() => {
                return Err(Error::cancelled(format!("Analysis of monitor {monitor_id}")));
            }
            results = join_all(polls) => results,
        };

        timelines.extend(results.into_iter().flatten());
        Ok(())
    }
}
