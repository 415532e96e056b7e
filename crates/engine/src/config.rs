//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Replicated state store configuration
    pub store: StoreConfig,

    /// Task distributor configuration
    pub distributor: DistributorConfig,

    /// Local timeline configuration
    pub timeline: TimelineConfig,

    /// Quorum analyzer configuration
    pub analyzer: AnalyzerConfig,

    /// Notification processor configuration
    pub notifications: NotificationConfig,
}

/// Replicated state store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long status history is kept in full when compacting
    pub retention: Duration,

    /// Log length above which the leader compacts the log
    pub compaction_threshold: usize,
}

/// Task distributor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorConfig {
    /// Quiescence window collapsing bursts of triggers into one pass
    pub debounce: Duration,

    /// Delay between attempts to push assignments to a node
    pub push_retry_interval: Duration,

    /// Delay before retrying a failed pass
    pub error_backoff: Duration,

    /// Timeout of a single peer request
    pub request_timeout: Duration,
}

/// Local timeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineConfig {
    /// How often the leader is told about timelines with transitions
    pub notify_interval: Duration,

    /// Timeout of the leader notification
    pub request_timeout: Duration,
}

/// Quorum analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Grace period after a check's timeout while waiting for late observers
    pub wait_buffer: Duration,

    /// Poll interval while waiting for late observers
    pub poll_interval: Duration,

    /// How often every assigned monitor is analyzed without a trigger
    pub sweep_interval: Duration,

    /// Timeout of a single timeline request
    pub request_timeout: Duration,
}

/// Notification processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// How often pending notifications are processed
    pub interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            compaction_threshold: 100,
        }
    }
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(3),
            push_retry_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            notify_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            wait_buffer: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}
