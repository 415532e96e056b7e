//! Application configuration document

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, Error};
use crate::foundation::types::{MonitorConfiguration, MonitorId};

/// Notification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Whether status changes trigger notifications
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// A monitor shown on a status page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMonitor {
    /// Referenced monitor
    pub monitor_id: MonitorId,
    /// Label on the page; the monitor's display name when absent
    #[serde(default)]
    pub display_name: Option<String>,
}

/// A group of monitors on a status page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCategory {
    /// Category title
    pub display_name: String,
    /// Monitors in this category
    #[serde(default)]
    pub monitors: Vec<PageMonitor>,
}

/// A public status page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageConfiguration {
    /// Page ID
    pub id: String,
    /// Page title
    #[serde(default)]
    pub display_name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Monitor groups
    #[serde(default)]
    pub categories: Vec<PageCategory>,
}

/// Replicated application configuration
///
/// Revisions increase monotonically; a proposal with a lower revision than the active
/// configuration is dismissed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppConfiguration {
    /// Revision number
    #[serde(default)]
    pub revision: u64,

    /// Notification settings
    #[serde(default)]
    pub notifications: NotificationSettings,

    /// Status pages
    #[serde(default)]
    pub pages: Vec<PageConfiguration>,

    /// Monitors
    #[serde(default)]
    pub monitors: Vec<MonitorConfiguration>,
}

impl AppConfiguration {
    /// Look up a monitor by ID
    pub fn monitor(&self, id: &MonitorId) -> Option<&MonitorConfiguration> {
        self.monitors.iter().find(|monitor| &monitor.id == id)
    }

    /// Validate the whole document; any failure rejects it entirely
    pub fn validate(&self) -> EngineResult<()> {
        let mut ids = HashSet::new();
        for monitor in &self.monitors {
            monitor.validate()?;
            if !ids.insert(&monitor.id) {
                return Err(Error::validation(format!(
                    "duplicate monitor id {}",
                    monitor.id
                )));
            }
        }

        let mut page_ids = HashSet::new();
        for page in &self.pages {
            if page.id.trim().is_empty() {
                return Err(Error::validation("page id must not be empty"));
            }
            if !page_ids.insert(page.id.to_lowercase()) {
                return Err(Error::validation(format!("duplicate page id {}", page.id)));
            }

            let unknown = page
                .categories
                .iter()
                .flat_map(|category| &category.monitors)
                .find(|entry| !ids.contains(&entry.monitor_id));
            if let Some(entry) = unknown {
                return Err(Error::validation(format!(
                    "page {} references unknown monitor {}",
                    page.id, entry.monitor_id
                )));
            }
        }

        Ok(())
    }
}
