//! Log storage abstraction
//!
//! Stores indexed byte sequences. The consensus layer never interprets the payloads;
//! compaction swaps a prefix of the log for a single snapshot payload supplied by the
//! state machine.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::ConsensusResult;
use crate::types::LogIndex;

/// Append / read / compact primitives over an ordered log
#[async_trait]
pub trait LogStorage: Clone + Send + Sync + 'static {
    /// Atomically append entries (one or more)
    async fn append(&self, entries: Vec<(LogIndex, Bytes)>) -> ConsensusResult<()>;

    /// Get the current bounds of the log (first_index, last_index)
    async fn bounds(&self) -> ConsensusResult<Option<(LogIndex, LogIndex)>>;

    /// Read a range of entries [start, end)
    async fn read_range(&self, start: LogIndex, end: LogIndex)
    -> ConsensusResult<Vec<(LogIndex, Bytes)>>;

    /// Replace every entry up to and including `index` with `snapshot`, stored at `index`
    async fn compact(&self, index: LogIndex, snapshot: Bytes) -> ConsensusResult<()>;
}

/// In-memory log storage using a BTreeMap for ordering
#[derive(Clone, Default)]
pub struct MemoryLogStorage {
    entries: Arc<RwLock<BTreeMap<LogIndex, Bytes>>>,
}

impl MemoryLogStorage {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the log holds no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl LogStorage for MemoryLogStorage {
    async fn append(&self, entries: Vec<(LogIndex, Bytes)>) -> ConsensusResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut log = self.entries.write().await;
        for (index, data) in entries {
            log.insert(index, data);
        }

        Ok(())
    }

    async fn bounds(&self) -> ConsensusResult<Option<(LogIndex, LogIndex)>> {
        let log = self.entries.read().await;
        let first = log.keys().next().copied();
        let last = log.keys().next_back().copied();

        Ok(first.zip(last))
    }

    async fn read_range(
        &self,
        start: LogIndex,
        end: LogIndex,
    ) -> ConsensusResult<Vec<(LogIndex, Bytes)>> {
        if start >= end {
            return Ok(Vec::new());
        }

        let log = self.entries.read().await;
        Ok(log
            .range(start..end)
            .map(|(&index, data)| (index, data.clone()))
            .collect())
    }

    async fn compact(&self, index: LogIndex, snapshot: Bytes) -> ConsensusResult<()> {
        let mut log = self.entries.write().await;

        let retained = log.split_off(&(index + 1));
        *log = retained;
        log.insert(index, snapshot);

        Ok(())
    }
}
