//! Cluster topology types for Vigil
//!
//! This crate provides:
//! - Node identity types (NodeId, Node)
//! - Node availability as reported by the consensus layer

pub mod node;
pub mod node_id;

pub use node::{Node, NodeAvailability};
pub use node_id::NodeId;
