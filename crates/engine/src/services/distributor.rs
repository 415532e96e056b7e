//! Task distribution
//!
//! Runs on the leader. Decides which nodes check which monitors, records every changed
//! node set in the log and pushes each node its full list of monitors. Passes are
//! debounced per trigger kind and a new pass always cancels the one in flight.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_consensus::{ClusterEvent, ConsensusLog};
use vigil_network::NetworkManager;
use vigil_topology::{Node, NodeId};

use crate::config::DistributorConfig;
use crate::error::{EngineResult, Error};
use crate::foundation::types::tick;
use crate::foundation::{AssignmentRecord, LogEntry, MonitorConfigInstance, Timestamp};
use crate::services::debounce::Debouncer;
use crate::services::messages::{MonitorRequest, MonitorResponse};
use crate::store::ReplicatedStateStore;

/// Monitors each node is expected to check
pub type AssignmentView = BTreeMap<NodeId, Vec<MonitorConfigInstance>>;

/// Decides whether a node may check a monitor
pub trait EligibilityPredicate: Send + Sync + 'static {
    /// Whether `node` may be assigned `monitor`
    fn is_eligible(&self, monitor: &MonitorConfigInstance, node: &Node) -> bool;
}

/// Every available node is eligible for every monitor
#[derive(Debug, Clone, Copy, Default)]
pub struct AllAvailableNodes;

impl EligibilityPredicate for AllAvailableNodes {
    fn is_eligible(&self, _monitor: &MonitorConfigInstance, node: &Node) -> bool {
        node.is_available()
    }
}

/// Bring `view` in line with the available nodes and configured monitors
///
/// Existing assignments survive unless their node left, their configuration changed or
/// the node is no longer eligible. Under-replicated monitors are then added to the
/// least loaded eligible nodes, ties broken by node ID.
pub fn rebalance(
    mut view: AssignmentView,
    nodes: &BTreeMap<NodeId, Node>,
    monitors: &[MonitorConfigInstance],
    eligibility: &dyn EligibilityPredicate,
) -> AssignmentView {
    let active: HashSet<&str> = monitors.iter().map(|instance| instance.hash()).collect();

    view.retain(|node_id, _| nodes.contains_key(node_id));
    for (node_id, node) in nodes {
        let assigned = view.entry(node_id.clone()).or_default();
        let mut seen = HashSet::new();
        assigned.retain(|instance| {
            active.contains(instance.hash())
                && eligibility.is_eligible(instance, node)
                && seen.insert(instance.id().clone())
        });
    }

    for instance in monitors {
        let monitor_id = instance.id();
        let wanted = instance.config().check_with;
        let assigned = view
            .values()
            .filter(|assigned| assigned.iter().any(|other| other.id() == monitor_id))
            .count();
        if assigned >= wanted {
            continue;
        }

        let mut candidates: Vec<(usize, &NodeId)> = view
            .iter()
            .filter(|(_, assigned)| !assigned.iter().any(|other| other.id() == monitor_id))
            .filter(|(node_id, _)| {
                nodes
                    .get(*node_id)
                    .is_some_and(|node| eligibility.is_eligible(instance, node))
            })
            .map(|(node_id, assigned)| (assigned.len(), node_id))
            .collect();
        candidates.sort();

        let missing = wanted - assigned;
        if candidates.len() < missing {
            warn!(
                "Monitor {} should be checked by {} nodes but only {} are eligible",
                monitor_id,
                wanted,
                assigned + candidates.len()
            );
        }

        let chosen: Vec<NodeId> = candidates
            .into_iter()
            .take(missing)
            .map(|(_, node_id)| node_id.clone())
            .collect();
        for node_id in chosen {
            view.entry(node_id).or_default().push(instance.clone());
        }
    }

    view
}

/// Nodes assigned to each monitor in `view`, sorted
fn nodes_by_monitor(view: &AssignmentView, instance: &MonitorConfigInstance) -> Vec<NodeId> {
    view.iter()
        .filter(|(_, assigned)| assigned.iter().any(|other| other.id() == instance.id()))
        .map(|(node_id, _)| node_id.clone())
        .collect()
}

/// Leader-side scheduler of monitoring work
pub struct TaskDistributor {
    node_id: NodeId,
    config: DistributorConfig,
    store: Arc<ReplicatedStateStore>,
    consensus: Arc<dyn ConsensusLog>,
    network: NetworkManager,
    eligibility: Arc<dyn EligibilityPredicate>,
    /// Last computed view; `None` until bootstrapped in the current term
    cache: Mutex<Option<AssignmentView>>,
    term: Mutex<CancellationToken>,
    pass: Mutex<Option<CancellationToken>>,
    configuration_trigger: Debouncer,
    availability_trigger: Debouncer,
    leadership_trigger: Debouncer,
}

impl TaskDistributor {
    /// Create a distributor
    pub fn new(
        config: DistributorConfig,
        store: Arc<ReplicatedStateStore>,
        consensus: Arc<dyn ConsensusLog>,
        network: NetworkManager,
        eligibility: Arc<dyn EligibilityPredicate>,
    ) -> Self {
        Self {
            node_id: consensus.local_node_id().clone(),
            config,
            store,
            consensus,
            network,
            eligibility,
            cache: Mutex::new(None),
            term: Mutex::new(CancellationToken::new()),
            pass: Mutex::new(None),
            configuration_trigger: Debouncer::new(),
            availability_trigger: Debouncer::new(),
            leadership_trigger: Debouncer::new(),
        }
    }

    /// Last computed assignment view
    pub fn cached_view(&self) -> Option<AssignmentView> {
        self.cache.lock().clone()
    }

    /// Schedule a pass after the configuration changed
    pub fn on_configuration_changed(self: &Arc<Self>) {
        self.schedule(&self.configuration_trigger, "configuration change");
    }

    /// Schedule a pass after a node's availability changed
    pub fn on_availability_changed(self: &Arc<Self>) {
        self.schedule(&self.availability_trigger, "availability change");
    }

    /// Schedule a pass after this node became leader
    pub fn on_leadership_acquired(self: &Arc<Self>) {
        self.schedule(&self.leadership_trigger, "leadership acquired");
    }

    /// Cancel pending and running passes and forget the cached view
    pub fn on_leadership_lost(&self) {
        {
            let mut term = self.term.lock();
            term.cancel();
            *term = CancellationToken::new();
        }
        self.configuration_trigger.cancel();
        self.availability_trigger.cancel();
        self.leadership_trigger.cancel();
        *self.cache.lock() = None;
        debug!("Distributor on {} stood down", self.node_id);
    }

    fn schedule(self: &Arc<Self>, trigger: &Debouncer, reason: &'static str) {
        if !self.consensus.is_leader() {
            return;
        }

        debug!("Distribution scheduled on {} after {}", self.node_id, reason);
        let distributor = self.clone();
        trigger.arm(self.config.debounce, move |trigger_token| async move {
            let pass_token = distributor.begin_pass();
            tokio::select! {
                _ = trigger_token.cancelled() => pass_token.cancel(),
                _ = distributor.distribute_with_retry(&pass_token) => {}
            }
            distributor.end_pass(&pass_token);
        });
    }

    /// Whether a pass is running and has not been cancelled
    pub fn is_distributing(&self) -> bool {
        self.pass
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Cancel the pass in flight and hand out a token for a new one
    fn begin_pass(&self) -> CancellationToken {
        let token = self.term.lock().child_token();
        if let Some(previous) = self.pass.lock().replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Forget a finished pass; a replaced pass was cancelled by its successor
    fn end_pass(&self, token: &CancellationToken) {
        let mut pass = self.pass.lock();
        if !token.is_cancelled() {
            *pass = None;
        }
    }

    /// Follow leadership, membership and configuration changes until cancelled
    pub async fn run(self: Arc<Self>, cancellation_token: CancellationToken) {
        let events = self.consensus.subscribe();
        let entries = self.store.subscribe();
        let mut configuration = self.store.snapshot().configuration().clone();

        if self.consensus.is_leader() {
            self.on_leadership_acquired();
        }

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    self.on_leadership_lost();
                    info!("Task distributor stopped on {}", self.node_id);
                    break;
                }
                event = events.recv_async() => match event {
                    Ok(ClusterEvent::LeaderChanged(leader)) => {
                        if leader.as_ref() == Some(&self.node_id) {
                            info!("Node {} took over task distribution", self.node_id);
                            self.on_leadership_acquired();
                        } else {
                            self.on_leadership_lost();
                        }
                    }
                    Ok(
                        ClusterEvent::AvailabilityChanged(_)
                        | ClusterEvent::MemberJoined(_)
                        | ClusterEvent::MemberLeft(_),
                    ) => self.on_availability_changed(),
                    Ok(ClusterEvent::EntryCommitted(_)) => {}
                    Err(_) => break,
                },
                entry = entries.recv_async() => match entry {
                    Ok(entry) => {
                        // A compacted log delivers new configurations inside snapshots
                        let committed = match entry.as_ref() {
                            LogEntry::Config(config) => Some(config.as_ref()),
                            LogEntry::Snapshot(state) => Some(state.configuration()),
                            _ => None,
                        };
                        if let Some(committed) = committed.filter(|c| **c != configuration) {
                            configuration = committed.clone();
                            self.on_configuration_changed();
                        }
                    }
                    Err(_) => break,
                },
            }
        }
    }

    /// Stop scheduling and wait for running passes
    pub async fn shutdown(&self) {
        self.on_leadership_lost();
        self.configuration_trigger.shutdown().await;
        self.availability_trigger.shutdown().await;
        self.leadership_trigger.shutdown().await;
    }

    async fn distribute_with_retry(&self, cancellation_token: &CancellationToken) {
        loop {
            match self.distribute(cancellation_token).await {
                Ok(()) => return,
                Err(_) if cancellation_token.is_cancelled() => {
                    debug!("Distribution pass on {} cancelled", self.node_id);
                    return;
                }
                Err(e) if e.is_cancelled() => return,
                Err(e) => error!(
                    "Distribution pass failed: {}; retrying in {}",
                    e,
                    humantime::format_duration(self.config.error_backoff)
                ),
            }

            tokio::select! {
                _ = cancellation_token.cancelled() => return,
                _ = tokio::time::sleep(self.config.error_backoff) => {}
            }
        }
    }

    /// Run one distribution pass
    pub async fn distribute(&self, cancellation_token: &CancellationToken) -> EngineResult<()> {
        if !self.consensus.is_leader() {
            return Err(Error::not_leader(
                "Task distribution runs on the leader",
                self.consensus.leader(),
            ));
        }

        let nodes: BTreeMap<NodeId, Node> = self
            .consensus
            .nodes()
            .into_iter()
            .filter(|node| node.is_available())
            .map(|node| (node.node_id().clone(), node))
            .collect();

        let cached = self.cache.lock().clone();
        let view = match cached {
            Some(view) => view,
            None => self.bootstrap(&nodes, cancellation_token).await?,
        };

        let state = self.store.snapshot();
        let monitors: Vec<MonitorConfigInstance> = state
            .configuration()
            .monitors
            .iter()
            .cloned()
            .map(MonitorConfigInstance::new)
            .collect();

        let view = rebalance(view, &nodes, &monitors, self.eligibility.as_ref());
        *self.cache.lock() = Some(view.clone());

        let now = Utc::now();
        for instance in &monitors {
            if cancellation_token.is_cancelled() {
                return Err(Error::cancelled("Distribution pass"));
            }

            let assigned = nodes_by_monitor(&view, instance);
            let last = state.latest_assignment(instance.id());
            let unchanged = last.is_some_and(|last| {
                let mut committed = last.nodes.clone();
                committed.sort();
                committed == assigned && last.config == *instance
            });
            if unchanged {
                continue;
            }

            let timestamp = last.map_or(now, |last| now.max(last.timestamp + tick()));
            info!(
                "Assigning monitor {} to {} node(s): {:?}",
                instance.id(),
                assigned.len(),
                assigned
            );

            let entry = LogEntry::Assignment(AssignmentRecord {
                monitor_id: instance.id().clone(),
                nodes: assigned,
                timestamp,
                config: instance.clone(),
            });
            if !self.consensus.write(entry.encode()?).await? {
                return Err(Error::not_leader(
                    "Lost leadership while writing assignments",
                    self.consensus.leader(),
                ));
            }
        }

        let pushes = view
            .iter()
            .map(|(node_id, monitors)| self.push(node_id, monitors, now, cancellation_token));
        for result in join_all(pushes).await {
            result?;
        }

        debug!("Distribution pass over {} node(s) complete", view.len());
        Ok(())
    }

    /// Ask every node which monitors it currently checks
    ///
    /// Nodes that cannot be asked start out with no monitors.
    async fn bootstrap(
        &self,
        nodes: &BTreeMap<NodeId, Node>,
        cancellation_token: &CancellationToken,
    ) -> EngineResult<AssignmentView> {
        info!("Rebuilding assignment view from {} node(s)", nodes.len());

        let requests = nodes.keys().map(|node_id| async move {
            let response = self
                .network
                .request(
                    node_id,
                    MonitorRequest::GetAssignedMonitors,
                    self.config.request_timeout,
                )
                .await;

            let monitors = match response {
                Ok(MonitorResponse::AssignedMonitors(monitors)) => monitors,
                Ok(other) => {
                    warn!("Unexpected assignment response from {}: {:?}", node_id, other);
                    Vec::new()
                }
                Err(e) => {
                    warn!("Failed to fetch assigned monitors from {}: {}", node_id, e);
                    Vec::new()
                }
            };
            (node_id.clone(), monitors)
        });

        tokio::select! {
            _ = cancellation_token.cancelled() => Err(Error::cancelled("Assignment bootstrap")),
            results = join_all(requests) => Ok(results.into_iter().collect()),
        }
    }

    /// Deliver a node's monitor list, retrying until it is acknowledged or superseded
    async fn push(
        &self,
        node_id: &NodeId,
        monitors: &[MonitorConfigInstance],
        timestamp: Timestamp,
        cancellation_token: &CancellationToken,
    ) -> EngineResult<()> {
        loop {
            let request = MonitorRequest::AssignMonitors {
                node_id: node_id.clone(),
                monitors: monitors.to_vec(),
                timestamp,
            };
            let attempt = self
                .network
                .request(node_id, request, self.config.request_timeout);

            let response = tokio::select! {
                _ = cancellation_token.cancelled() => {
                    return Err(Error::cancelled(format!("Assignment push to {node_id}")));
                }
                response = attempt => response,
            };

            match response {
                Ok(MonitorResponse::Ack) => return Ok(()),
                Ok(other) => warn!("Unexpected assignment response from {}: {:?}", node_id, other),
                Err(e) => debug!("Failed to push assignments to {}: {}", node_id, e),
            }

            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    return Err(Error::cancelled(format!("Assignment push to {node_id}")));
                }
                _ = tokio::time::sleep(self.config.push_retry_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::MonitorConfiguration;
    use vigil_topology::NodeAvailability;

    fn monitor(id: &str, check_with: usize) -> MonitorConfigInstance {
        let config: MonitorConfiguration = serde_json::from_value(serde_json::json!({
            "id": id,
            "check_with": check_with,
            "interval": "@every 10s",
            "tcp": { "host": "localhost", "port": 80 },
        }))
        .unwrap();
        MonitorConfigInstance::new(config)
    }

    fn cluster(seeds: &[u8]) -> BTreeMap<NodeId, Node> {
        seeds
            .iter()
            .map(|seed| {
                let node_id = NodeId::from_seed(*seed);
                let node = Node::new(node_id.clone(), false, NodeAvailability::Available);
                (node_id, node)
            })
            .collect()
    }

    fn assigned_to(view: &AssignmentView, id: &str) -> Vec<NodeId> {
        nodes_by_monitor(view, &monitor(id, 1))
    }

    #[test]
    fn test_assigns_exactly_check_with_nodes() {
        let nodes = cluster(&[1, 2, 3, 4]);
        let view = rebalance(
            AssignmentView::new(),
            &nodes,
            &[monitor("web", 3)],
            &AllAvailableNodes,
        );

        assert_eq!(assigned_to(&view, "web").len(), 3);
        assert_eq!(view.len(), 4);
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_shortfall_assigns_every_node() {
        let nodes = cluster(&[1, 2]);
        let view = rebalance(
            AssignmentView::new(),
            &nodes,
            &[monitor("web", 3)],
            &AllAvailableNodes,
        );

        assert_eq!(
            assigned_to(&view, "web"),
            vec![NodeId::from_seed(1), NodeId::from_seed(2)]
        );
        assert!(logs_contain("should be checked by 3 nodes but only 2 are eligible"));
    }

    #[test]
    fn test_least_loaded_nodes_chosen_first() {
        let nodes = cluster(&[1, 2, 3]);
        let monitors = [monitor("a", 1), monitor("b", 1), monitor("c", 1)];
        let view = rebalance(AssignmentView::new(), &nodes, &monitors, &AllAvailableNodes);

        for node_id in nodes.keys() {
            assert_eq!(view[node_id].len(), 1);
        }
        assert_eq!(assigned_to(&view, "a"), vec![NodeId::from_seed(1)]);
        assert_eq!(assigned_to(&view, "b"), vec![NodeId::from_seed(2)]);
        assert_eq!(assigned_to(&view, "c"), vec![NodeId::from_seed(3)]);
    }

    #[test]
    fn test_existing_assignments_are_kept() {
        let nodes = cluster(&[1, 2, 3]);
        let mut view = AssignmentView::new();
        view.insert(NodeId::from_seed(3), vec![monitor("web", 1)]);

        let view = rebalance(view, &nodes, &[monitor("web", 1)], &AllAvailableNodes);
        assert_eq!(assigned_to(&view, "web"), vec![NodeId::from_seed(3)]);
    }

    #[test]
    fn test_departed_nodes_are_replaced() {
        let mut view = AssignmentView::new();
        view.insert(NodeId::from_seed(1), vec![monitor("web", 2)]);
        view.insert(NodeId::from_seed(2), vec![monitor("web", 2)]);

        let nodes = cluster(&[1, 3]);
        let view = rebalance(view, &nodes, &[monitor("web", 2)], &AllAvailableNodes);
        assert!(!view.contains_key(&NodeId::from_seed(2)));
        assert_eq!(
            assigned_to(&view, "web"),
            vec![NodeId::from_seed(1), NodeId::from_seed(3)]
        );
    }

    #[test]
    fn test_changed_configuration_drops_stale_instances() {
        let nodes = cluster(&[1]);
        let mut view = AssignmentView::new();
        view.insert(NodeId::from_seed(1), vec![monitor("web", 1), monitor("gone", 1)]);

        let view = rebalance(view, &nodes, &[monitor("web", 2)], &AllAvailableNodes);
        let assigned = &view[&NodeId::from_seed(1)];
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0], monitor("web", 2));
    }

    struct OnlyNode(NodeId);

    impl EligibilityPredicate for OnlyNode {
        fn is_eligible(&self, _monitor: &MonitorConfigInstance, node: &Node) -> bool {
            node.node_id() == &self.0
        }
    }

    #[test]
    fn test_ineligible_nodes_are_skipped() {
        let nodes = cluster(&[1, 2, 3]);
        let mut view = AssignmentView::new();
        view.insert(NodeId::from_seed(1), vec![monitor("web", 2)]);

        let view = rebalance(
            view,
            &nodes,
            &[monitor("web", 2)],
            &OnlyNode(NodeId::from_seed(2)),
        );
        assert_eq!(assigned_to(&view, "web"), vec![NodeId::from_seed(2)]);
        assert!(view[&NodeId::from_seed(1)].is_empty());
    }
}
