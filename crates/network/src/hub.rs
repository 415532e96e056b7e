//! In-process request routing
//!
//! Routes envelopes between managers living in the same process. Each member can be cut
//! off from the hub to simulate a crashed or partitioned node: requests to or from an
//! unreachable member fail with `ConnectionFailed`.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use tokio::sync::oneshot;
use tracing::{debug, info};
use vigil_topology::NodeId;

use crate::error::{NetworkError, NetworkResult};
use crate::message::Envelope;

/// Request delivered to a manager's receive loop
pub(crate) struct InboundRequest {
    pub envelope: Envelope,
    pub reply: oneshot::Sender<NetworkResult<Bytes>>,
}

/// Registry of in-process endpoints
#[derive(Clone, Default)]
pub struct MemoryHub {
    endpoints: Arc<DashMap<NodeId, flume::Sender<InboundRequest>>>,
    unreachable: Arc<DashSet<NodeId>>,
}

impl MemoryHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Cut a member off from the hub, or reconnect it
    pub fn set_reachable(&self, node_id: &NodeId, reachable: bool) {
        if reachable {
            self.unreachable.remove(node_id);
            info!("Node {} is reachable", node_id);
        } else {
            self.unreachable.insert(node_id.clone());
            info!("Node {} is unreachable", node_id);
        }
    }

    /// Whether a member is connected
    pub fn is_reachable(&self, node_id: &NodeId) -> bool {
        !self.unreachable.contains(node_id)
    }

    pub(crate) fn register(
        &self,
        node_id: &NodeId,
        sender: flume::Sender<InboundRequest>,
    ) -> NetworkResult<()> {
        if self.endpoints.contains_key(node_id) {
            return Err(NetworkError::ConnectionFailed {
                node: Box::new(node_id.clone()),
                reason: "node already has a listener".to_string(),
            });
        }

        self.endpoints.insert(node_id.clone(), sender);
        debug!("Registered hub endpoint for node {}", node_id);
        Ok(())
    }

    pub(crate) fn unregister(&self, node_id: &NodeId) {
        self.endpoints.remove(node_id);
    }

    pub(crate) async fn deliver(
        &self,
        target: &NodeId,
        envelope: Envelope,
    ) -> NetworkResult<Bytes> {
        for node in [&envelope.sender, target] {
            if !self.is_reachable(node) {
                return Err(NetworkError::ConnectionFailed {
                    node: Box::new(target.clone()),
                    reason: format!("node {node} is unreachable"),
                });
            }
        }

        let endpoint = self
            .endpoints
            .get(target)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| NetworkError::PeerNotFound(Box::new(target.clone())))?;

        let (reply, response) = oneshot::channel();
        endpoint
            .send_async(InboundRequest { envelope, reply })
            .await
            .map_err(|_| NetworkError::ChannelClosed(format!("listener for {target} closed")))?;

        response
            .await
            .map_err(|_| NetworkError::ChannelClosed("Response channel closed".to_string()))?
    }
}
