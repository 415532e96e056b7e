//! Consensus log abstraction for Vigil
//!
//! The monitoring engine is built on top of a replicated, single-writer log. This crate
//! defines the minimal surface the engine needs from such a log:
//! - `ConsensusLog` for writes, leadership and membership
//! - `StateMachine` for ordered application of committed entries and compaction
//! - `LogStorage` for the append / read / compact primitives
//!
//! `MemoryCluster` is an in-process implementation where every node handle shares one
//! committed log. Each node applies entries strictly in commit order on its own task.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod memory;
pub mod storage;
pub mod traits;
pub mod types;

pub use error::{ConsensusError, ConsensusResult};
pub use memory::{MemoryCluster, MemoryClusterConfig, MemoryConsensus};
pub use storage::{LogStorage, MemoryLogStorage};
pub use traits::{ConsensusLog, StateMachine};
pub use types::{ClusterEvent, LogIndex};
