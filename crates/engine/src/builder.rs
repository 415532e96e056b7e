//! Monitoring node builder

use std::sync::Arc;

use vigil_consensus::{ConsensusLog, StateMachine};
use vigil_network::NetworkManager;
use vigil_topology::NodeId;

use crate::config::EngineConfig;
use crate::error::{EngineResult, Error, ErrorKind};
use crate::node::{ConsensusLeader, MonitorNode, NodeParts};
use crate::services::{
    AllAvailableNodes, ConfigurationService, DefaultProbe, EligibilityPredicate,
    LocalTimelineRecorder, MonitorProbe, MonitorService, MonitorTaskHandler,
    NotificationProcessor, NotificationProvider, TaskDistributor, TimelineQuorumAnalyzer,
};
use crate::store::ReplicatedStateStore;

/// Attaches the node's state store to a consensus log and returns the node's handle
type ConsensusFactory = Box<dyn FnOnce(Arc<dyn StateMachine>) -> Arc<dyn ConsensusLog> + Send>;

/// Monitoring node builder
pub struct MonitorNodeBuilder {
    /// Node ID
    node_id: NodeId,

    /// Configuration
    config: Option<EngineConfig>,

    /// Network manager
    network: Option<NetworkManager>,

    /// Consensus log
    consensus: Option<ConsensusFactory>,

    probe: Option<Arc<dyn MonitorProbe>>,
    eligibility: Option<Arc<dyn EligibilityPredicate>>,
    notification_providers: Vec<Arc<dyn NotificationProvider>>,
}

impl MonitorNodeBuilder {
    /// Create a new builder
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            config: None,
            network: None,
            consensus: None,
            probe: None,
            eligibility: None,
            notification_providers: Vec::new(),
        }
    }

    /// Set configuration; defaults apply otherwise
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set network manager
    pub fn with_network(mut self, network: NetworkManager) -> Self {
        self.network = Some(network);
        self
    }

    /// Set the consensus log
    ///
    /// `join` receives the node's state machine and must return this node's handle to a
    /// log that applies committed entries to it.
    pub fn with_consensus<F>(mut self, join: F) -> Self
    where
        F: FnOnce(Arc<dyn StateMachine>) -> Arc<dyn ConsensusLog> + Send + 'static,
    {
        self.consensus = Some(Box::new(join));
        self
    }

    /// Replace the HTTP/TCP probe
    pub fn with_probe(mut self, probe: Arc<dyn MonitorProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Restrict which nodes may check which monitors
    pub fn with_eligibility(mut self, eligibility: Arc<dyn EligibilityPredicate>) -> Self {
        self.eligibility = Some(eligibility);
        self
    }

    /// Add a notification provider
    pub fn with_notification_provider(mut self, provider: Arc<dyn NotificationProvider>) -> Self {
        self.notification_providers.push(provider);
        self
    }

    /// Build the node
    pub fn build(self) -> EngineResult<MonitorNode> {
        let config = self.config.unwrap_or_default();

        let network = self.network.ok_or_else(|| {
            Error::with_context(ErrorKind::Configuration, "Network manager not set")
        })?;

        let join = self.consensus.ok_or_else(|| {
            Error::with_context(ErrorKind::Configuration, "Consensus log not set")
        })?;

        if network.node_id() != &self.node_id {
            return Err(Error::with_context(
                ErrorKind::Configuration,
                format!(
                    "Network manager belongs to {}, not {}",
                    network.node_id(),
                    self.node_id
                ),
            ));
        }

        let store = Arc::new(ReplicatedStateStore::new(config.store.clone()));
        let consensus = join(store.clone());

        if consensus.local_node_id() != &self.node_id {
            return Err(Error::with_context(
                ErrorKind::Configuration,
                format!(
                    "Consensus handle belongs to {}, not {}",
                    consensus.local_node_id(),
                    self.node_id
                ),
            ));
        }

        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(DefaultProbe::new()));
        let eligibility = self
            .eligibility
            .unwrap_or_else(|| Arc::new(AllAvailableNodes));

        let recorder = Arc::new(LocalTimelineRecorder::new(
            self.node_id.clone(),
            config.timeline.clone(),
        ));
        let tasks = Arc::new(MonitorTaskHandler::new(
            self.node_id.clone(),
            recorder.clone(),
            probe,
        ));
        let distributor = Arc::new(TaskDistributor::new(
            config.distributor.clone(),
            store.clone(),
            consensus.clone(),
            network.clone(),
            eligibility,
        ));
        let analyzer = Arc::new(TimelineQuorumAnalyzer::new(
            config.analyzer.clone(),
            store.clone(),
            consensus.clone(),
            network.clone(),
        ));
        let configuration = Arc::new(ConfigurationService::new(store.clone(), consensus.clone()));
        let notifications = Arc::new(NotificationProcessor::new(
            config.notifications.clone(),
            store.clone(),
            consensus.clone(),
            self.notification_providers,
        ));

        network.set_leader_lookup(Arc::new(ConsensusLeader::new(consensus.clone())));
        network.register_service(Arc::new(MonitorService::new(
            tasks.clone(),
            recorder.clone(),
            analyzer.clone(),
            configuration,
        )))?;

        Ok(MonitorNode::new(NodeParts {
            node_id: self.node_id,
            config,
            store,
            consensus,
            network,
            recorder,
            tasks,
            distributor,
            analyzer,
            notifications,
        }))
    }
}
