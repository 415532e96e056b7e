//! In-process consensus cluster
//!
//! All node handles share one committed log. Writes are accepted only from the current
//! leader, and every member runs its own applier task that feeds its `StateMachine` in
//! commit order. Leadership follows availability: when the leader becomes unavailable the
//! first available member (by ID) takes over.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use vigil_topology::{Node, NodeAvailability, NodeId};

use crate::error::{ConsensusError, ConsensusResult};
use crate::storage::{LogStorage, MemoryLogStorage};
use crate::traits::{ConsensusLog, StateMachine};
use crate::types::{ClusterEvent, LogIndex};

/// Configuration for an in-process cluster
#[derive(Debug, Clone)]
pub struct MemoryClusterConfig {
    /// Compact the log once it holds more than this many entries, unless the member's
    /// state machine sets its own threshold
    pub compaction_threshold: usize,

    /// How long a write waits for the local apply before failing
    pub write_timeout: Duration,
}

impl Default for MemoryClusterConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: 100,
            write_timeout: Duration::from_secs(5),
        }
    }
}

struct Member {
    availability: NodeAvailability,
    availability_tx: watch::Sender<NodeAvailability>,
    subscribers: Vec<flume::Sender<ClusterEvent>>,
    cancellation_token: CancellationToken,
}

struct ClusterInner {
    config: MemoryClusterConfig,
    storage: MemoryLogStorage,
    members: RwLock<BTreeMap<NodeId, Member>>,
    leader: RwLock<Option<NodeId>>,
    commit_tx: watch::Sender<LogIndex>,
    write_lock: Mutex<()>,
    cancellation_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl ClusterInner {
    fn publish(&self, event: ClusterEvent) {
        let mut members = self.members.write();
        for member in members.values_mut() {
            member
                .subscribers
                .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        }
    }

    fn publish_to(&self, node_id: &NodeId, event: ClusterEvent) {
        let mut members = self.members.write();
        if let Some(member) = members.get_mut(node_id) {
            member
                .subscribers
                .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        }
    }

    fn leader(&self) -> Option<NodeId> {
        self.leader.read().clone()
    }

    fn is_writable(&self, node_id: &NodeId) -> bool {
        self.leader().as_ref() == Some(node_id)
            && self
                .members
                .read()
                .get(node_id)
                .is_some_and(|member| member.availability.is_available())
    }

    fn elect(&self, candidate: Option<NodeId>) {
        {
            let mut leader = self.leader.write();
            if *leader == candidate {
                return;
            }
            *leader = candidate.clone();
        }

        match &candidate {
            Some(node_id) => info!("Node {} is now the cluster leader", node_id),
            None => warn!("Cluster has no leader"),
        }

        self.publish(ClusterEvent::LeaderChanged(candidate));
    }

    fn reelect(&self) {
        let candidate = self
            .members
            .read()
            .iter()
            .find(|(_, member)| member.availability.is_available())
            .map(|(node_id, _)| node_id.clone());

        self.elect(candidate);
    }

    fn node(&self, node_id: &NodeId, availability: NodeAvailability) -> Node {
        let is_leader = self.leader().as_ref() == Some(node_id);
        Node::new(node_id.clone(), is_leader, availability)
    }
}

/// An in-process cluster sharing one replicated log
#[derive(Clone)]
pub struct MemoryCluster {
    inner: Arc<ClusterInner>,
}

impl MemoryCluster {
    /// Create an empty cluster
    pub fn new(config: MemoryClusterConfig) -> Self {
        let (commit_tx, _) = watch::channel(0);

        Self {
            inner: Arc::new(ClusterInner {
                config,
                storage: MemoryLogStorage::new(),
                members: RwLock::new(BTreeMap::new()),
                leader: RwLock::new(None),
                commit_tx,
                write_lock: Mutex::new(()),
                cancellation_token: CancellationToken::new(),
                task_tracker: TaskTracker::new(),
            }),
        }
    }

    /// Add a member and start replaying the log into its state machine
    ///
    /// The first member to join becomes leader.
    pub fn join(
        &self,
        node_id: NodeId,
        state_machine: Arc<dyn StateMachine>,
    ) -> Arc<MemoryConsensus> {
        let (availability_tx, availability_rx) = watch::channel(NodeAvailability::Available);
        let (applied_tx, _) = watch::channel(0);
        let applied_tx = Arc::new(applied_tx);
        let cancellation_token = self.inner.cancellation_token.child_token();

        self.inner.members.write().insert(
            node_id.clone(),
            Member {
                availability: NodeAvailability::Available,
                availability_tx,
                subscribers: Vec::new(),
                cancellation_token: cancellation_token.clone(),
            },
        );

        info!("Node {} joined the cluster", node_id);

        let node = self.inner.node(&node_id, NodeAvailability::Available);
        self.inner.publish(ClusterEvent::MemberJoined(node));

        if self.inner.leader().is_none() {
            self.inner.elect(Some(node_id.clone()));
        }

        let applier = Applier {
            inner: self.inner.clone(),
            node_id: node_id.clone(),
            state_machine: state_machine.clone(),
            applied_tx: applied_tx.clone(),
        };
        self.inner
            .task_tracker
            .spawn(applier.run(availability_rx, cancellation_token));

        Arc::new(MemoryConsensus {
            node_id,
            inner: self.inner.clone(),
            state_machine,
            applied_tx,
        })
    }

    /// Remove a member; its applier stops and leadership moves if needed
    pub fn leave(&self, node_id: &NodeId) {
        let Some(member) = self.inner.members.write().remove(node_id) else {
            return;
        };
        member.cancellation_token.cancel();

        info!("Node {} left the cluster", node_id);
        self.inner.publish(ClusterEvent::MemberLeft(node_id.clone()));

        if self.inner.leader().as_ref() == Some(node_id) {
            self.inner.reelect();
        }
    }

    /// Mark a member available or unavailable
    ///
    /// Unavailable members stop applying entries until they recover, then catch up.
    pub fn set_available(&self, node_id: &NodeId, available: bool) {
        let availability = if available {
            NodeAvailability::Available
        } else {
            NodeAvailability::Unavailable
        };

        {
            let mut members = self.inner.members.write();
            let Some(member) = members.get_mut(node_id) else {
                warn!("Cannot change availability of unknown node {}", node_id);
                return;
            };
            if member.availability == availability {
                return;
            }
            member.availability = availability;
            member.availability_tx.send_replace(availability);
        }

        info!("Node {} availability changed to {:?}", node_id, availability);

        let node = self.inner.node(node_id, availability);
        self.inner.publish(ClusterEvent::AvailabilityChanged(node));

        let leader = self.inner.leader();
        if (!available && leader.as_ref() == Some(node_id)) || (available && leader.is_none()) {
            self.inner.reelect();
        }
    }

    /// Force leadership onto a member, or clear it
    pub fn elect(&self, node_id: Option<NodeId>) {
        self.inner.elect(node_id);
    }

    /// Current leader
    pub fn leader(&self) -> Option<NodeId> {
        self.inner.leader()
    }

    /// Number of entries currently held in the shared log
    pub async fn log_len(&self) -> usize {
        self.inner.storage.len().await
    }

    /// Read the shared log
    pub async fn entries(&self) -> ConsensusResult<Vec<(LogIndex, Bytes)>> {
        self.inner.storage.read_range(0, LogIndex::MAX).await
    }

    /// Stop every applier
    pub async fn shutdown(&self) {
        self.inner.cancellation_token.cancel();
        self.inner.task_tracker.close();
        self.inner.task_tracker.wait().await;
    }
}

struct Applier {
    inner: Arc<ClusterInner>,
    node_id: NodeId,
    state_machine: Arc<dyn StateMachine>,
    applied_tx: Arc<watch::Sender<LogIndex>>,
}

impl Applier {
    async fn run(
        self,
        mut availability_rx: watch::Receiver<NodeAvailability>,
        cancellation_token: CancellationToken,
    ) {
        let mut commit_rx = self.inner.commit_tx.subscribe();

        loop {
            let available = availability_rx.borrow_and_update().is_available();
            if available {
                let commit = *commit_rx.borrow_and_update();
                if let Err(e) = self.catch_up(commit).await {
                    warn!("Node {} failed to apply log entries: {}", self.node_id, e);
                }
            }

            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    debug!("Applier for node {} stopped", self.node_id);
                    break;
                }
                changed = commit_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = availability_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn catch_up(&self, commit: LogIndex) -> ConsensusResult<()> {
        let applied = *self.applied_tx.borrow();
        if commit <= applied {
            return Ok(());
        }

        // A compacted prefix shows up as a single snapshot entry at a later index
        let entries = self.inner.storage.read_range(applied + 1, commit + 1).await?;
        for (index, payload) in entries {
            self.state_machine.apply(index, &payload);
            self.applied_tx.send_replace(index);
            self.inner
                .publish_to(&self.node_id, ClusterEvent::EntryCommitted(index));
        }

        Ok(())
    }
}

/// One member's handle to a `MemoryCluster`
pub struct MemoryConsensus {
    node_id: NodeId,
    inner: Arc<ClusterInner>,
    state_machine: Arc<dyn StateMachine>,
    applied_tx: Arc<watch::Sender<LogIndex>>,
}

impl MemoryConsensus {
    async fn maybe_compact(&self, index: LogIndex) -> ConsensusResult<()> {
        let threshold = self
            .state_machine
            .compaction_threshold()
            .unwrap_or(self.inner.config.compaction_threshold);
        if self.inner.storage.len().await <= threshold {
            return Ok(());
        }

        let entries = self.inner.storage.read_range(0, index + 1).await?;
        match self.state_machine.compact(&entries) {
            Some(snapshot) => {
                self.inner.storage.compact(index, snapshot).await?;
                info!("Compacted {} log entries up to index {}", entries.len(), index);
            }
            None => warn!("State machine produced no snapshot for index {}", index),
        }

        Ok(())
    }
}

#[async_trait]
impl ConsensusLog for MemoryConsensus {
    fn local_node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn nodes(&self) -> Vec<Node> {
        let leader = self.inner.leader();
        self.inner
            .members
            .read()
            .iter()
            .map(|(node_id, member)| {
                Node::new(
                    node_id.clone(),
                    leader.as_ref() == Some(node_id),
                    member.availability,
                )
            })
            .collect()
    }

    fn leader(&self) -> Option<NodeId> {
        self.inner.leader()
    }

    fn subscribe(&self) -> flume::Receiver<ClusterEvent> {
        let (tx, rx) = flume::unbounded();
        if let Some(member) = self.inner.members.write().get_mut(&self.node_id) {
            member.subscribers.push(tx);
        }
        rx
    }

    async fn write(&self, payload: Bytes) -> ConsensusResult<bool> {
        if self.inner.cancellation_token.is_cancelled() {
            return Err(ConsensusError::Shutdown);
        }
        if !self.inner.is_writable(&self.node_id) {
            return Ok(false);
        }

        let index = {
            let _guard = self.inner.write_lock.lock().await;

            // Leadership may have moved while waiting for the lock
            if !self.inner.is_writable(&self.node_id) {
                return Ok(false);
            }

            let index = self
                .inner
                .storage
                .bounds()
                .await?
                .map(|(_, last)| last + 1)
                .unwrap_or(1);

            self.inner.storage.append(vec![(index, payload)]).await?;
            self.inner.commit_tx.send_replace(index);

            if let Err(e) = self.maybe_compact(index).await {
                warn!("Log compaction at index {} failed: {}", index, e);
            }

            index
        };

        self.wait_for_applied(index, self.inner.config.write_timeout)
            .await?;

        Ok(true)
    }

    fn applied_index(&self) -> LogIndex {
        *self.applied_tx.borrow()
    }

    async fn wait_for_applied(&self, index: LogIndex, timeout: Duration) -> ConsensusResult<()> {
        let mut applied_rx = self.applied_tx.subscribe();

        tokio::time::timeout(timeout, applied_rx.wait_for(|applied| *applied >= index))
            .await
            .map_err(|_| ConsensusError::Timeout(timeout))?
            .map(|_| ())
            .map_err(|_| ConsensusError::Shutdown)
    }
}
