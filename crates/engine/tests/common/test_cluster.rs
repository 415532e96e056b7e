//! In-memory cluster utilities for integration testing

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use vigil_consensus::{ConsensusLog, MemoryCluster, MemoryClusterConfig};
use vigil_engine::config::{AnalyzerConfig, DistributorConfig, NotificationConfig};
use vigil_engine::foundation::types::TcpCheck;
use vigil_engine::{
    EngineConfig, MonitorConfiguration, MonitorId, MonitorNode, MonitorNodeBuilder,
    MonitorProbe, MonitorStatus, NotificationProvider,
};
use vigil_network::{MemoryHub, NetworkManager};
use vigil_topology::NodeId;

/// Install a test subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("vigil_engine=debug,vigil_consensus=info,vigil_network=info")
        .with_test_writer()
        .try_init();
}

/// Engine configuration with short delays so tests converge quickly
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        distributor: DistributorConfig {
            debounce: Duration::from_millis(100),
            push_retry_interval: Duration::from_millis(100),
            error_backoff: Duration::from_millis(500),
            ..Default::default()
        },
        analyzer: AnalyzerConfig {
            wait_buffer: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            sweep_interval: Duration::from_millis(500),
            ..Default::default()
        },
        notifications: NotificationConfig {
            interval: Duration::from_millis(200),
        },
        ..Default::default()
    }
}

/// A TCP monitor checked every second
pub fn monitor(id: &str, check_with: usize) -> MonitorConfiguration {
    MonitorConfiguration {
        id: MonitorId::new(id),
        display_name: id.to_string(),
        check_with,
        interval: "@every 1s".to_string(),
        timeout_secs: 1.0,
        available_threshold: 1.0,
        partial_threshold: 0.5,
        http: None,
        tcp: Some(TcpCheck {
            host: "127.0.0.1".to_string(),
            port: 9,
        }),
    }
}

/// Probe whose outcome the test controls
pub struct StaticProbe {
    status: Mutex<MonitorStatus>,
}

impl StaticProbe {
    pub fn new(status: MonitorStatus) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(status),
        })
    }

    pub fn set(&self, status: MonitorStatus) {
        *self.status.lock() = status;
    }
}

#[async_trait]
impl MonitorProbe for StaticProbe {
    async fn check(&self, _config: &MonitorConfiguration) -> MonitorStatus {
        *self.status.lock()
    }
}

/// Notification provider that remembers what it was asked to send
#[derive(Default)]
pub struct RecordingProvider {
    pub sent: Mutex<Vec<(MonitorId, MonitorStatus)>>,
}

#[async_trait]
impl NotificationProvider for RecordingProvider {
    fn id(&self) -> &str {
        "recording"
    }

    async fn send(
        &self,
        record: &vigil_engine::StatusRecord,
    ) -> vigil_engine::EngineResult<bool> {
        self.sent
            .lock()
            .push((record.monitor_id.clone(), record.status));
        Ok(true)
    }
}

/// N monitoring nodes sharing one in-memory log and one in-memory hub
pub struct TestCluster {
    pub consensus: MemoryCluster,
    pub hub: MemoryHub,
    pub nodes: Vec<Arc<MonitorNode>>,
    config: EngineConfig,
    probe: Arc<dyn MonitorProbe>,
    providers: Vec<Arc<dyn NotificationProvider>>,
}

impl TestCluster {
    pub fn new(config: EngineConfig, probe: Arc<dyn MonitorProbe>) -> Self {
        Self {
            consensus: MemoryCluster::new(MemoryClusterConfig::default()),
            hub: MemoryHub::new(),
            nodes: Vec::new(),
            config,
            probe,
            providers: Vec::new(),
        }
    }

    /// Notification providers handed to nodes added from now on
    pub fn with_provider(mut self, provider: Arc<dyn NotificationProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Build and start `count` nodes; the first node of a cluster becomes leader
    pub fn add_nodes(&mut self, count: usize) -> Vec<Arc<MonitorNode>> {
        let mut added = Vec::new();

        for _ in 0..count {
            let seed = self.nodes.len() as u8 + 1;
            let node_id = NodeId::from_seed(seed);
            let network = NetworkManager::new(node_id.clone(), self.hub.clone());

            let cluster = self.consensus.clone();
            let join_id = node_id.clone();
            let mut builder = MonitorNodeBuilder::new(node_id)
                .with_config(self.config.clone())
                .with_network(network)
                .with_consensus(move |state_machine| -> Arc<dyn ConsensusLog> {
                    cluster.join(join_id, state_machine)
                })
                .with_probe(self.probe.clone());
            for provider in &self.providers {
                builder = builder.with_notification_provider(provider.clone());
            }

            let node = Arc::new(builder.build().expect("Failed to build node"));
            node.start().expect("Failed to start node");

            self.nodes.push(node.clone());
            added.push(node);
        }

        added
    }

    pub fn node(&self, node_id: &NodeId) -> &Arc<MonitorNode> {
        self.nodes
            .iter()
            .find(|node| node.node_id() == node_id)
            .expect("Unknown node")
    }

    pub fn leader(&self) -> Option<&Arc<MonitorNode>> {
        let leader = self.consensus.leader()?;
        self.nodes.iter().find(|node| node.node_id() == &leader)
    }

    /// Simulate a crash: the node stops participating in consensus and the hub
    pub fn kill(&self, node_id: &NodeId) {
        self.hub.set_reachable(node_id, false);
        self.consensus.set_available(node_id, false);
    }

    pub async fn shutdown(self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
        self.consensus.shutdown().await;
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
