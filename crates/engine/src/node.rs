//! A monitoring cluster member
//!
//! Owns one node's store, consensus handle, network manager and services, and runs the
//! background loops of those services between `start` and `shutdown`.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use vigil_consensus::ConsensusLog;
use vigil_network::{LeaderLookup, NetworkManager};
use vigil_topology::NodeId;

use crate::config::EngineConfig;
use crate::error::{EngineResult, Error};
use crate::foundation::AppConfiguration;
use crate::services::{
    LocalTimelineRecorder, MonitorRequest, MonitorResponse, MonitorTaskHandler,
    NotificationProcessor, ProposalOutcome, TaskDistributor, TimelineQuorumAnalyzer,
};
use crate::store::ReplicatedStateStore;

/// Resolves the leader for leader-bound requests from the consensus log
pub(crate) struct ConsensusLeader {
    consensus: Arc<dyn ConsensusLog>,
}

impl ConsensusLeader {
    pub(crate) fn new(consensus: Arc<dyn ConsensusLog>) -> Self {
        Self { consensus }
    }
}

impl LeaderLookup for ConsensusLeader {
    fn leader(&self) -> Option<NodeId> {
        self.consensus.leader()
    }
}

/// Lifecycle state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Built, not started
    NotStarted,
    /// Background loops running
    Running,
    /// Shutting down
    Stopping,
    /// Stopped; cannot be restarted
    Stopped,
}

pub(crate) struct NodeParts {
    pub node_id: NodeId,
    pub config: EngineConfig,
    pub store: Arc<ReplicatedStateStore>,
    pub consensus: Arc<dyn ConsensusLog>,
    pub network: NetworkManager,
    pub recorder: Arc<LocalTimelineRecorder>,
    pub tasks: Arc<MonitorTaskHandler>,
    pub distributor: Arc<TaskDistributor>,
    pub analyzer: Arc<TimelineQuorumAnalyzer>,
    pub notifications: Arc<NotificationProcessor>,
}

/// One member of a monitoring cluster
pub struct MonitorNode {
    node_id: NodeId,
    config: EngineConfig,
    store: Arc<ReplicatedStateStore>,
    consensus: Arc<dyn ConsensusLog>,
    network: NetworkManager,
    recorder: Arc<LocalTimelineRecorder>,
    tasks: Arc<MonitorTaskHandler>,
    distributor: Arc<TaskDistributor>,
    analyzer: Arc<TimelineQuorumAnalyzer>,
    notifications: Arc<NotificationProcessor>,
    state: Mutex<NodeState>,
    cancellation_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl MonitorNode {
    pub(crate) fn new(parts: NodeParts) -> Self {
        Self {
            node_id: parts.node_id,
            config: parts.config,
            store: parts.store,
            consensus: parts.consensus,
            network: parts.network,
            recorder: parts.recorder,
            tasks: parts.tasks,
            distributor: parts.distributor,
            analyzer: parts.analyzer,
            notifications: parts.notifications,
            state: Mutex::new(NodeState::NotStarted),
            cancellation_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Start serving requests and running background loops
    pub fn start(&self) -> EngineResult<()> {
        {
            let mut state = self.state.lock();
            if *state != NodeState::NotStarted {
                return Err(Error::invalid_state(format!(
                    "Node cannot be started from {:?} state",
                    *state
                )));
            }
            *state = NodeState::Running;
        }

        info!("Starting monitoring node {}", self.node_id);

        self.network.start()?;

        self.task_tracker.spawn(self.recorder.clone().run(
            self.store.clone(),
            self.network.clone(),
            self.cancellation_token.child_token(),
        ));
        self.task_tracker.spawn(
            self.distributor
                .clone()
                .run(self.cancellation_token.child_token()),
        );
        self.task_tracker.spawn(
            self.analyzer
                .clone()
                .run(self.cancellation_token.child_token()),
        );
        self.task_tracker.spawn(
            self.notifications
                .clone()
                .run(self.cancellation_token.child_token()),
        );

        Ok(())
    }

    /// Stop background loops, check runners and the network manager
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if *state != NodeState::Running {
                return;
            }
            *state = NodeState::Stopping;
        }

        info!("Stopping monitoring node {}", self.node_id);

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        self.distributor.shutdown().await;
        self.analyzer.shutdown().await;
        self.tasks.shutdown().await;
        self.network.shutdown().await;

        *self.state.lock() = NodeState::Stopped;
        info!("Monitoring node {} stopped", self.node_id);
    }

    /// Propose a new configuration to the cluster
    ///
    /// Sent to the leader, from any node. Transport failures and leader changes are
    /// retried until the node shuts down; a configuration that fails validation comes
    /// back as a validation error.
    pub async fn propose_configuration(
        &self,
        config: AppConfiguration,
        force_on_equal_revision: bool,
    ) -> EngineResult<ProposalOutcome> {
        let request = MonitorRequest::ProposeConfiguration {
            config: Box::new(config),
            force_on_equal_revision,
        };

        loop {
            let response = self
                .network
                .request_leader(request.clone(), self.config.distributor.request_timeout)
                .await;

            match response {
                Ok(MonitorResponse::ConfigurationAccepted { revision }) => {
                    return Ok(ProposalOutcome::Accepted { revision });
                }
                Ok(MonitorResponse::ConfigurationDismissed { reason }) => {
                    return Ok(ProposalOutcome::Dismissed { reason });
                }
                Ok(MonitorResponse::ConfigurationRejected { reason }) => {
                    return Err(Error::validation(reason));
                }
                Ok(other) => {
                    return Err(Error::operation_failed(format!(
                        "Unexpected response to configuration proposal: {other:?}"
                    )));
                }
                Err(e) => debug!("Configuration proposal not delivered, retrying: {}", e),
            }

            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    return Err(Error::cancelled("Configuration proposal"));
                }
                _ = tokio::time::sleep(self.config.distributor.push_retry_interval) => {}
            }
        }
    }

    /// Node ID
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Lifecycle state
    pub fn state(&self) -> NodeState {
        *self.state.lock()
    }

    /// Whether this node currently leads the cluster
    pub fn is_leader(&self) -> bool {
        self.consensus.is_leader()
    }

    /// Replicated application state
    pub fn store(&self) -> &Arc<ReplicatedStateStore> {
        &self.store
    }

    /// Consensus handle
    pub fn consensus(&self) -> &Arc<dyn ConsensusLog> {
        &self.consensus
    }

    /// Network manager
    pub fn network(&self) -> &NetworkManager {
        &self.network
    }

    /// Local timeline recorder
    pub fn recorder(&self) -> &Arc<LocalTimelineRecorder> {
        &self.recorder
    }

    /// Local check runners
    pub fn tasks(&self) -> &Arc<MonitorTaskHandler> {
        &self.tasks
    }

    /// Task distributor
    pub fn distributor(&self) -> &Arc<TaskDistributor> {
        &self.distributor
    }

    /// Timeline analyzer
    pub fn analyzer(&self) -> &Arc<TimelineQuorumAnalyzer> {
        &self.analyzer
    }
}
