//! Replicated state store
//!
//! Materializes the committed log into an [`ApplicationState`]. Applies happen one entry
//! at a time in commit order; readers get a shared, immutable snapshot and never block
//! the apply path for longer than a pointer copy.

mod compaction;

pub use compaction::build_snapshot;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};
use vigil_consensus::{LogIndex, StateMachine};

use crate::config::StoreConfig;
use crate::foundation::types::to_delta;
use crate::foundation::{ApplicationState, ApplyOutcome, LogEntry};

/// Applies committed log entries and serves snapshots of the result
pub struct ReplicatedStateStore {
    config: StoreConfig,
    state: RwLock<Arc<ApplicationState>>,
    applied_index: AtomicU64,
    subscribers: Mutex<Vec<flume::Sender<Arc<LogEntry>>>>,
}

impl ReplicatedStateStore {
    /// Create an empty store
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            state: RwLock::new(Arc::new(ApplicationState::new())),
            applied_index: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Current state
    ///
    /// The returned value is never mutated; later applies copy on write.
    pub fn snapshot(&self) -> Arc<ApplicationState> {
        self.state.read().clone()
    }

    /// Index of the last entry seen by the store
    pub fn applied_index(&self) -> LogIndex {
        self.applied_index.load(Ordering::Acquire)
    }

    /// Receive every entry after it has been applied to the state
    pub fn subscribe(&self) -> flume::Receiver<Arc<LogEntry>> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Apply a decoded entry
    pub fn apply_entry(&self, index: LogIndex, entry: LogEntry) {
        let kind = entry.kind();
        let published = match &entry {
            LogEntry::Snapshot(_) => None,
            other => Some(other.clone()),
        };

        let outcome = {
            let mut state = self.state.write();
            Arc::make_mut(&mut state).apply(entry)
        };
        self.applied_index.fetch_max(index, Ordering::AcqRel);

        match outcome {
            ApplyOutcome::Applied => debug!("Applied {} entry at index {}", kind, index),
            ApplyOutcome::Rejected(reason) => {
                warn!("Dropped {} entry at index {}: {}", kind, index, reason);
                return;
            }
        }

        let published = published.unwrap_or_else(|| {
            LogEntry::Snapshot(Box::new(ApplicationState::clone(&self.snapshot())))
        });
        let published = Arc::new(published);
        self.subscribers
            .lock()
            .retain(|tx| tx.send(published.clone()).is_ok());
    }
}

impl StateMachine for ReplicatedStateStore {
    fn apply(&self, index: LogIndex, payload: &Bytes) {
        match LogEntry::decode(payload) {
            Ok(entry) => self.apply_entry(index, entry),
            Err(e) => {
                self.applied_index.fetch_max(index, Ordering::AcqRel);
                warn!("Dropped malformed entry at index {}: {}", index, e);
            }
        }
    }

    fn compact(&self, entries: &[(LogIndex, Bytes)]) -> Option<Bytes> {
        let cutoff = Utc::now()
            .checked_sub_signed(to_delta(self.config.retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        match build_snapshot(entries, cutoff) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                error!("Failed to build snapshot: {}", e);
                None
            }
        }
    }

    fn compaction_threshold(&self) -> Option<usize> {
        Some(self.config.compaction_threshold)
    }
}
