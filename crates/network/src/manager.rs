//! Network manager: typed requests, dispatch and leader forwarding

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use vigil_topology::NodeId;

use crate::error::{NetworkError, NetworkResult};
use crate::hub::{InboundRequest, MemoryHub};
use crate::message::{Envelope, ServiceMessage, decode, encode};
use crate::service::{Service, ServiceContext, ServiceHandler, create_service_handler};

/// Maximum number of times a leader-bound request is forwarded
const MAX_FORWARD_HOPS: u8 = 3;

/// Resolves the current cluster leader for leader-bound requests
pub trait LeaderLookup: Send + Sync + 'static {
    /// Current leader, if any
    fn leader(&self) -> Option<NodeId>;
}

struct ManagerInner {
    node_id: NodeId,
    hub: MemoryHub,
    handlers: DashMap<&'static str, Arc<dyn ServiceHandler>>,
    leader_lookup: RwLock<Option<Arc<dyn LeaderLookup>>>,
    forward_timeout: Duration,
}

impl ManagerInner {
    fn leader(&self) -> Option<NodeId> {
        self.leader_lookup
            .read()
            .as_ref()
            .and_then(|lookup| lookup.leader())
    }

    async fn dispatch(&self, envelope: Envelope) -> NetworkResult<Bytes> {
        if envelope.to_leader {
            match self.leader() {
                Some(leader) if leader == self.node_id => {}
                Some(leader) => return self.forward(leader, envelope).await,
                None => return Err(NetworkError::NoLeader),
            }
        }

        let handler = self
            .handlers
            .get(envelope.service_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| NetworkError::NoHandler {
                service: envelope.service_id.to_string(),
            })?;

        let ctx = ServiceContext {
            sender: envelope.sender,
        };
        handler.handle(envelope.payload, ctx).await
    }

    async fn forward(&self, leader: NodeId, mut envelope: Envelope) -> NetworkResult<Bytes> {
        if envelope.hops >= MAX_FORWARD_HOPS {
            return Err(NetworkError::NoLeader);
        }

        debug!(
            "Forwarding {} request from {} to leader {}",
            envelope.service_id, envelope.sender, leader
        );

        envelope.hops += 1;
        timeout(self.forward_timeout, self.hub.deliver(&leader, envelope))
            .await
            .map_err(|_| NetworkError::Timeout(self.forward_timeout))?
    }
}

/// Sends typed requests to peers and dispatches incoming ones to registered services
#[derive(Clone)]
pub struct NetworkManager {
    inner: Arc<ManagerInner>,
    cancellation_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl NetworkManager {
    /// Create a manager for `node_id` attached to `hub`
    pub fn new(node_id: NodeId, hub: MemoryHub) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                node_id,
                hub,
                handlers: DashMap::new(),
                leader_lookup: RwLock::new(None),
                forward_timeout: Duration::from_secs(5),
            }),
            cancellation_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Local node ID
    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    /// Install the leader resolver used for leader-bound requests
    pub fn set_leader_lookup(&self, lookup: Arc<dyn LeaderLookup>) {
        *self.inner.leader_lookup.write() = Some(lookup);
    }

    /// Register a service for its request type
    pub fn register_service<S: Service>(&self, service: Arc<S>) -> NetworkResult<()> {
        let service_id = <S::Request as ServiceMessage>::service_id();
        if self.inner.handlers.contains_key(service_id) {
            return Err(NetworkError::HandlerAlreadyRegistered {
                service: service_id.to_string(),
            });
        }

        self.inner
            .handlers
            .insert(service_id, create_service_handler(service));
        debug!("Registered service {} on {}", service_id, self.inner.node_id);
        Ok(())
    }

    /// Attach to the hub and start serving incoming requests
    pub fn start(&self) -> NetworkResult<()> {
        let (tx, rx) = flume::unbounded::<InboundRequest>();
        self.inner.hub.register(&self.inner.node_id, tx)?;

        let inner = self.inner.clone();
        let token = self.cancellation_token.clone();
        let tracker = self.task_tracker.clone();

        self.task_tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = rx.recv_async() => {
                        let Ok(InboundRequest { envelope, reply }) = received else {
                            break;
                        };

                        let inner = inner.clone();
                        tracker.spawn(async move {
                            let result = inner.dispatch(envelope).await;
                            let _ = reply.send(result);
                        });
                    }
                }
            }
        });

        info!("Network manager started for {}", self.inner.node_id);
        Ok(())
    }

    /// Send a typed request and wait for its typed response
    pub async fn request<M: ServiceMessage>(
        &self,
        target: &NodeId,
        message: M,
        timeout_duration: Duration,
    ) -> NetworkResult<M::Response> {
        self.send(target, message, false, timeout_duration).await
    }

    /// Send a request that must be executed by the leader
    ///
    /// Goes to the locally known leader; a receiver that is not the leader forwards it.
    pub async fn request_leader<M: ServiceMessage>(
        &self,
        message: M,
        timeout_duration: Duration,
    ) -> NetworkResult<M::Response> {
        let target = self.inner.leader().ok_or(NetworkError::NoLeader)?;
        self.send(&target, message, true, timeout_duration).await
    }

    async fn send<M: ServiceMessage>(
        &self,
        target: &NodeId,
        message: M,
        to_leader: bool,
        timeout_duration: Duration,
    ) -> NetworkResult<M::Response> {
        let envelope = Envelope {
            sender: self.inner.node_id.clone(),
            service_id: M::service_id(),
            payload: encode(&message)?,
            to_leader,
            hops: 0,
        };

        let request = async {
            if target == &self.inner.node_id {
                self.inner.dispatch(envelope).await
            } else {
                self.inner.hub.deliver(target, envelope).await
            }
        };

        let response = match timeout(timeout_duration, request).await {
            Ok(response) => response?,
            Err(_) => {
                warn!(
                    "Request {} to {} timed out after {:?}",
                    M::service_id(),
                    target,
                    timeout_duration
                );
                return Err(NetworkError::Timeout(timeout_duration));
            }
        };

        decode(&response)
    }

    /// Detach from the hub and stop all request tasks
    pub async fn shutdown(&self) {
        self.inner.hub.unregister(&self.inner.node_id);
        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        info!("Network manager stopped for {}", self.inner.node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Echo(String);

    impl ServiceMessage for Echo {
        type Response = String;

        fn service_id() -> &'static str {
            "echo"
        }
    }

    struct EchoService {
        node_id: NodeId,
    }

    #[async_trait]
    impl Service for EchoService {
        type Request = Echo;

        async fn handle(&self, request: Echo, ctx: ServiceContext) -> NetworkResult<String> {
            Ok(format!("{} from {} via {}", request.0, ctx.sender, self.node_id))
        }
    }

    struct FixedLeader(NodeId);

    impl LeaderLookup for FixedLeader {
        fn leader(&self) -> Option<NodeId> {
            Some(self.0.clone())
        }
    }

    fn start_nodes(hub: &MemoryHub, count: u8) -> Vec<NetworkManager> {
        (1..=count)
            .map(|seed| {
                let node_id = NodeId::from_seed(seed);
                let manager = NetworkManager::new(node_id.clone(), hub.clone());
                manager
                    .register_service(Arc::new(EchoService { node_id }))
                    .unwrap();
                manager.set_leader_lookup(Arc::new(FixedLeader(NodeId::from_seed(1))));
                manager.start().unwrap();
                manager
            })
            .collect()
    }

    #[tokio::test]
    async fn test_request_reply_between_nodes() {
        let hub = MemoryHub::new();
        let nodes = start_nodes(&hub, 2);

        let response = nodes[0]
            .request(&NodeId::from_seed(2), Echo("hi".into()), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response, "hi from node-1 via node-2");

        for node in nodes {
            node.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_leader_bound_request_is_forwarded() {
        let hub = MemoryHub::new();
        let nodes = start_nodes(&hub, 3);

        // node-3 believes node-2 leads; node-2 knows node-1 does
        nodes[2].set_leader_lookup(Arc::new(FixedLeader(NodeId::from_seed(2))));

        let response = nodes[2]
            .request_leader(Echo("hello".into()), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response, "hello from node-3 via node-1");

        for node in nodes {
            node.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_unreachable_peer_fails() {
        let hub = MemoryHub::new();
        let nodes = start_nodes(&hub, 2);
        hub.set_reachable(&NodeId::from_seed(2), false);

        let result = nodes[0]
            .request(&NodeId::from_seed(2), Echo("hi".into()), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(NetworkError::ConnectionFailed { .. })));

        hub.set_reachable(&NodeId::from_seed(2), true);
        assert!(
            nodes[0]
                .request(&NodeId::from_seed(2), Echo("hi".into()), Duration::from_secs(1))
                .await
                .is_ok()
        );

        for node in nodes {
            node.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_unknown_peer_and_missing_handler() {
        let hub = MemoryHub::new();
        let nodes = start_nodes(&hub, 1);

        let result = nodes[0]
            .request(&NodeId::from_seed(9), Echo("hi".into()), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(NetworkError::PeerNotFound(_))));

        let bare = NetworkManager::new(NodeId::from_seed(5), hub.clone());
        bare.start().unwrap();
        let result = nodes[0]
            .request(&NodeId::from_seed(5), Echo("hi".into()), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(NetworkError::NoHandler { .. })));

        bare.shutdown().await;
        for node in nodes {
            node.shutdown().await;
        }
    }
}
