//! Peer RPC layer for Vigil
//!
//! This crate provides typed request/response messaging between cluster members:
//! - `ServiceMessage` ties a request type to its response type and service ID
//! - `Service` handles requests for one service ID
//! - `NetworkManager` sends requests with timeouts and forwards leader-bound requests
//! - `MemoryHub` routes requests between managers in the same process
//!
//! Payloads are CBOR-encoded on the way through the hub, so handlers only ever see
//! owned, deserialized messages.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hub;
pub mod manager;
pub mod message;
pub mod service;

// Re-export commonly used types
pub use error::{NetworkError, NetworkResult};
pub use hub::MemoryHub;
pub use manager::{LeaderLookup, NetworkManager};
pub use message::ServiceMessage;
pub use service::{Service, ServiceContext};
