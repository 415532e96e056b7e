//! Notification processing
//!
//! Runs on the leader. Every authoritative status change (non-redundant record) is
//! handed once to each provider that handles its monitor; delivery is recorded in the
//! log so a new leader does not notify again.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_consensus::ConsensusLog;

use crate::config::NotificationConfig;
use crate::error::{EngineResult, Error};
use crate::foundation::{LogEntry, MonitorId, NotificationRecord, StatusRecord};
use crate::store::ReplicatedStateStore;

/// Delivers notifications about status changes
#[async_trait]
pub trait NotificationProvider: Send + Sync + 'static {
    /// Stable identifier, used to remember what this provider already sent
    fn id(&self) -> &str;

    /// Whether this provider notifies about `monitor_id`
    fn handles(&self, _monitor_id: &MonitorId) -> bool {
        true
    }

    /// Deliver a notification; `Ok(false)` means delivery failed and may be retried
    async fn send(&self, record: &StatusRecord) -> EngineResult<bool>;
}

/// Hands unsent status changes to the notification providers
pub struct NotificationProcessor {
    config: NotificationConfig,
    store: Arc<ReplicatedStateStore>,
    consensus: Arc<dyn ConsensusLog>,
    providers: Vec<Arc<dyn NotificationProvider>>,
}

impl NotificationProcessor {
    /// Create a processor
    pub fn new(
        config: NotificationConfig,
        store: Arc<ReplicatedStateStore>,
        consensus: Arc<dyn ConsensusLog>,
        providers: Vec<Arc<dyn NotificationProvider>>,
    ) -> Self {
        Self {
            config,
            store,
            consensus,
            providers,
        }
    }

    /// Process pending notifications periodically while leader
    pub async fn run(self: Arc<Self>, cancellation_token: CancellationToken) {
        if self.providers.is_empty() {
            debug!("No notification providers configured");
            return;
        }

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("Notification processor stopped");
                    break;
                }
                _ = interval.tick() => {
                    if !self.consensus.is_leader() {
                        continue;
                    }
                    if let Err(e) = self.process().await {
                        error!("Notification round failed: {}", e);
                    }
                }
            }
        }
    }

    /// Send every pending notification once; returns how many were delivered
    pub async fn process(&self) -> EngineResult<usize> {
        let state = self.store.snapshot();
        if !state.configuration().notifications.enabled {
            debug!("Notifications are disabled");
            return Ok(0);
        }

        let mut delivered = 0;
        for record in state.status_records().filter(|record| !record.redundant) {
            for provider in &self.providers {
                if !provider.handles(&record.monitor_id)
                    || state.notification_sent(
                        &record.monitor_id,
                        record.check_timestamp,
                        provider.id(),
                    )
                {
                    continue;
                }

                match provider.send(record).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(
                            "Provider {} could not notify about monitor {}",
                            provider.id(),
                            record.monitor_id
                        );
                        continue;
                    }
                    Err(e) => {
                        error!(
                            "Provider {} failed to notify about monitor {}: {}",
                            provider.id(),
                            record.monitor_id,
                            e
                        );
                        continue;
                    }
                }

                let entry = LogEntry::NotificationSent(NotificationRecord {
                    monitor_id: record.monitor_id.clone(),
                    check_timestamp: record.check_timestamp,
                    provider_id: provider.id().to_string(),
                });
                if !self.consensus.write(entry.encode()?).await? {
                    return Err(Error::not_leader(
                        "Lost leadership while recording notifications",
                        self.consensus.leader(),
                    ));
                }
                delivered += 1;
            }
        }

        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::foundation::{AppConfiguration, MonitorStatus};
    use chrono::{TimeDelta, Utc};
    use parking_lot::Mutex;
    use vigil_consensus::{MemoryCluster, MemoryClusterConfig};
    use vigil_topology::NodeId;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<StatusRecord>>,
    }

    #[async_trait]
    impl NotificationProvider for Recording {
        fn id(&self) -> &str {
            "recording"
        }

        fn handles(&self, monitor_id: &MonitorId) -> bool {
            monitor_id.as_str() != "ignored"
        }

        async fn send(&self, record: &StatusRecord) -> EngineResult<bool> {
            self.sent.lock().push(record.clone());
            Ok(true)
        }
    }

    async fn write(consensus: &Arc<dyn ConsensusLog>, entry: LogEntry) {
        assert!(consensus.write(entry.encode().unwrap()).await.unwrap());
    }

    fn status(monitor: &str, offset: i64, status: MonitorStatus, redundant: bool) -> LogEntry {
        LogEntry::StatusChange(StatusRecord {
            monitor_id: MonitorId::new(monitor),
            status,
            check_timestamp: Utc::now() - TimeDelta::minutes(10) + TimeDelta::seconds(offset),
            redundant,
        })
    }

    #[tokio::test]
    async fn test_each_change_notified_once() {
        let cluster = MemoryCluster::new(MemoryClusterConfig::default());
        let store = Arc::new(ReplicatedStateStore::new(StoreConfig::default()));
        let consensus: Arc<dyn ConsensusLog> = cluster.join(NodeId::from_seed(1), store.clone());
        let provider = Arc::new(Recording::default());

        write(&consensus, status("web", 0, MonitorStatus::Reachable, false)).await;
        write(&consensus, status("web", 10, MonitorStatus::Reachable, true)).await;
        write(&consensus, status("web", 20, MonitorStatus::NotReachable, false)).await;
        write(&consensus, status("ignored", 0, MonitorStatus::NotReachable, false)).await;

        let providers: Vec<Arc<dyn NotificationProvider>> = vec![provider.clone()];
        let processor = NotificationProcessor::new(
            NotificationConfig::default(),
            store.clone(),
            consensus.clone(),
            providers,
        );

        assert_eq!(processor.process().await.unwrap(), 2);
        assert_eq!(processor.process().await.unwrap(), 0);

        let sent: Vec<_> = provider.sent.lock().iter().map(|r| r.status).collect();
        assert_eq!(sent, vec![MonitorStatus::Reachable, MonitorStatus::NotReachable]);
        assert_eq!(store.snapshot().notifications().len(), 2);

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabled_notifications() {
        let cluster = MemoryCluster::new(MemoryClusterConfig::default());
        let store = Arc::new(ReplicatedStateStore::new(StoreConfig::default()));
        let consensus: Arc<dyn ConsensusLog> = cluster.join(NodeId::from_seed(1), store.clone());

        let mut config = AppConfiguration {
            revision: 1,
            ..Default::default()
        };
        config.notifications.enabled = false;
        write(&consensus, LogEntry::Config(Box::new(config))).await;
        write(&consensus, status("web", 0, MonitorStatus::NotReachable, false)).await;

        let providers: Vec<Arc<dyn NotificationProvider>> = vec![Arc::new(Recording::default())];
        let processor =
            NotificationProcessor::new(NotificationConfig::default(), store, consensus, providers);
        assert_eq!(processor.process().await.unwrap(), 0);

        cluster.shutdown().await;
    }
}
