//! Error types for the peer RPC layer

use std::time::Duration;

use thiserror::Error;
use vigil_topology::NodeId;

/// Network operation errors
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Connection failed
    #[error("Failed to connect to {node}: {reason}")]
    ConnectionFailed {
        /// Target node
        node: Box<NodeId>,
        /// Why the connection failed
        reason: String,
    },

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(Box<NodeId>),

    /// No handler registered
    #[error("No handler registered for service '{service}'")]
    NoHandler {
        /// Service ID of the request
        service: String,
    },

    /// Handler already registered
    #[error("Handler already registered for service '{service}'")]
    HandlerAlreadyRegistered {
        /// Service ID of the handler
        service: String,
    },

    /// Leader-bound request could not reach a leader
    #[error("No leader available to handle request")]
    NoLeader,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Timeout
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Channel closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Service error
    #[error("Service error: {0}")]
    ServiceError(String),
}

/// Result type alias
pub type NetworkResult<T> = Result<T, NetworkError>;
