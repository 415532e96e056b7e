//! Peer RPC entry point of a monitoring node

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use vigil_network::{NetworkError, NetworkResult, Service, ServiceContext};

use crate::error::ErrorKind;
use crate::services::analyzer::TimelineQuorumAnalyzer;
use crate::services::configuration::{ConfigurationService, ProposalOutcome};
use crate::services::messages::{MonitorRequest, MonitorResponse};
use crate::services::tasks::MonitorTaskHandler;
use crate::services::timeline::LocalTimelineRecorder;

/// Dispatches [`MonitorRequest`]s to the node's components
pub struct MonitorService {
    tasks: Arc<MonitorTaskHandler>,
    recorder: Arc<LocalTimelineRecorder>,
    analyzer: Arc<TimelineQuorumAnalyzer>,
    configuration: Arc<ConfigurationService>,
}

impl MonitorService {
    /// Create the service
    pub fn new(
        tasks: Arc<MonitorTaskHandler>,
        recorder: Arc<LocalTimelineRecorder>,
        analyzer: Arc<TimelineQuorumAnalyzer>,
        configuration: Arc<ConfigurationService>,
    ) -> Self {
        Self {
            tasks,
            recorder,
            analyzer,
            configuration,
        }
    }
}

#[async_trait]
impl Service for MonitorService {
    type Request = MonitorRequest;

    async fn handle(
        &self,
        request: MonitorRequest,
        ctx: ServiceContext,
    ) -> NetworkResult<MonitorResponse> {
        match request {
            MonitorRequest::AssignMonitors {
                node_id,
                monitors,
                timestamp,
            } => {
                debug!(
                    "Received {} monitor(s) from {} (pass at {})",
                    monitors.len(),
                    ctx.sender,
                    timestamp
                );
                if &node_id != self.recorder.node_id() {
                    warn!("Ignoring assignment addressed to {}", node_id);
                    return Err(NetworkError::ServiceError(format!(
                        "assignment addressed to {node_id}"
                    )));
                }
                self.tasks.assign(monitors);
                Ok(MonitorResponse::Ack)
            }
            MonitorRequest::GetAssignedMonitors => {
                Ok(MonitorResponse::AssignedMonitors(self.tasks.assigned()))
            }
            MonitorRequest::GetTimeline { monitor_id } => {
                Ok(MonitorResponse::Timeline(self.recorder.get(&monitor_id)))
            }
            MonitorRequest::NotifyTimelineUpdated { monitors } => {
                let started = self.analyzer.trigger(monitors);
                debug!("{} notified updated timelines, {} analyses started", ctx.sender, started);
                Ok(MonitorResponse::Ack)
            }
            MonitorRequest::ProposeConfiguration {
                config,
                force_on_equal_revision,
            } => match self
                .configuration
                .propose(*config, force_on_equal_revision)
                .await
            {
                Ok(ProposalOutcome::Accepted { revision }) => {
                    Ok(MonitorResponse::ConfigurationAccepted { revision })
                }
                Ok(ProposalOutcome::Dismissed { reason }) => {
                    Ok(MonitorResponse::ConfigurationDismissed { reason })
                }
                Err(e) if *e.kind() == ErrorKind::Validation => {
                    Ok(MonitorResponse::ConfigurationRejected {
                        reason: e.to_string(),
                    })
                }
                Err(e) if e.is_not_leader() => Err(NetworkError::NoLeader),
                Err(e) => Err(e.into()),
            },
        }
    }
}
