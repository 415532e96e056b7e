//! Services running on every monitoring node
//!
//! Leader-only services (distribution, analysis, notifications) run on every node and
//! stay idle unless the local node leads the cluster.

pub mod analyzer;
pub mod configuration;
pub mod debounce;
pub mod distributor;
pub mod handler;
pub mod messages;
pub mod notifications;
pub mod probe;
pub mod tasks;
pub mod timeline;

pub use analyzer::{TimelineQuorumAnalyzer, classify};
pub use configuration::{ConfigurationService, ProposalOutcome};
pub use debounce::Debouncer;
pub use distributor::{AllAvailableNodes, AssignmentView, EligibilityPredicate, TaskDistributor};
pub use handler::MonitorService;
pub use messages::{MonitorRequest, MonitorResponse};
pub use notifications::{NotificationProcessor, NotificationProvider};
pub use probe::{DefaultProbe, HttpProbe, MonitorProbe, TcpProbe};
pub use tasks::MonitorTaskHandler;
pub use timeline::LocalTimelineRecorder;
