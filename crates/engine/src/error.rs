//! Error types for the monitoring engine

use std::fmt;

use thiserror::Error;
use vigil_consensus::ConsensusError;
use vigil_network::NetworkError;
use vigil_topology::NodeId;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, Error>;

/// Main error type for the engine
#[derive(Debug, Error)]
pub struct Error {
    /// Error kind
    kind: ErrorKind,
    /// Error context
    context: ErrorContext,
}

impl Error {
    /// Create error with string context
    pub fn with_context(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: ErrorContext::Message(context.into()),
        }
    }

    /// Get error kind
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Get error context
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::InvalidState, msg)
    }

    /// Create an operation failed error
    pub fn operation_failed(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::OperationFailed, msg)
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Timeout, msg)
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Network, msg)
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Storage, msg)
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Validation, msg)
    }

    /// Create a cancelled error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Cancelled, msg)
    }

    /// Create a not leader error
    pub fn not_leader(msg: impl Into<String>, current_leader: Option<NodeId>) -> Self {
        Self {
            kind: ErrorKind::NotLeader,
            context: ErrorContext::Leadership {
                message: msg.into(),
                current_leader,
            },
        }
    }

    /// Check if this is a not-leader error
    pub fn is_not_leader(&self) -> bool {
        matches!(self.kind, ErrorKind::NotLeader)
    }

    /// Check if this is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Get the current leader from a not-leader error
    pub fn get_leader(&self) -> Option<&NodeId> {
        match &self.context {
            ErrorContext::Leadership { current_leader, .. } => current_leader.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            ErrorContext::Message(msg) => write!(f, "{}: {}", self.kind, msg),
            ErrorContext::Chain { message, source } => {
                write!(f, "{}: {} (caused by: {})", self.kind, message, source)
            }
            ErrorContext::Leadership {
                message,
                current_leader,
            } => {
                if let Some(leader) = current_leader {
                    write!(f, "{}: {} (current leader: {})", self.kind, message, leader)
                } else {
                    write!(f, "{}: {} (no known leader)", self.kind, message)
                }
            }
        }
    }
}

/// Error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid state for operation
    InvalidState,
    /// Operation failed
    OperationFailed,
    /// Operation timed out
    Timeout,
    /// Network error
    Network,
    /// Storage error
    Storage,
    /// Configuration error
    Configuration,
    /// Consensus error
    Consensus,
    /// Validation error
    Validation,
    /// Operation was cancelled
    Cancelled,
    /// Not the leader
    NotLeader,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidState => write!(f, "Invalid state"),
            ErrorKind::OperationFailed => write!(f, "Operation failed"),
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::Network => write!(f, "Network error"),
            ErrorKind::Storage => write!(f, "Storage error"),
            ErrorKind::Configuration => write!(f, "Configuration error"),
            ErrorKind::Consensus => write!(f, "Consensus error"),
            ErrorKind::Validation => write!(f, "Validation error"),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
            ErrorKind::NotLeader => write!(f, "Not the leader"),
        }
    }
}

/// Error context
#[derive(Debug)]
pub enum ErrorContext {
    /// Simple message
    Message(String),
    /// Error chain with source
    Chain {
        /// Error message
        message: String,
        /// Source error
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Leadership error with info
    Leadership {
        /// Error message
        message: String,
        /// Current leader if known
        current_leader: Option<NodeId>,
    },
}

impl From<ConsensusError> for Error {
    fn from(err: ConsensusError) -> Self {
        let kind = match &err {
            ConsensusError::Timeout(_) => ErrorKind::Timeout,
            ConsensusError::Storage(_) => ErrorKind::Storage,
            ConsensusError::NotMember(_) | ConsensusError::Shutdown => ErrorKind::Consensus,
        };
        Self {
            kind,
            context: ErrorContext::Chain {
                message: "Consensus error".to_string(),
                source: Box::new(err),
            },
        }
    }
}

impl From<NetworkError> for Error {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::NoLeader => Self::not_leader("No leader to route request to", None),
            NetworkError::Timeout(duration) => {
                Self::timeout(format!("Request timed out after {duration:?}"))
            }
            other => Self {
                kind: ErrorKind::Network,
                context: ErrorContext::Chain {
                    message: "Network error".to_string(),
                    source: Box::new(other),
                },
            },
        }
    }
}

impl From<Error> for NetworkError {
    fn from(err: Error) -> Self {
        NetworkError::ServiceError(err.to_string())
    }
}
