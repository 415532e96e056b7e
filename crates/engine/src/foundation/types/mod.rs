//! Core types for the monitoring domain

mod app_config;
mod instance;
mod monitor;
mod schedule;
mod timeline;
mod timestamp;

pub use app_config::{
    AppConfiguration, NotificationSettings, PageCategory, PageConfiguration, PageMonitor,
};
pub use instance::MonitorConfigInstance;
pub use monitor::{
    HttpCheck, HttpMethod, MonitorConfiguration, MonitorId, MonitorStatus, StatusCodeRange,
    TcpCheck,
};
pub use schedule::CheckSchedule;
pub use timeline::TimelineSegment;
pub use timestamp::{Timestamp, tick, to_delta, until};
