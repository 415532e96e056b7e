//! Monitor configuration paired with its content hash

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::foundation::types::{MonitorConfiguration, MonitorId};

/// A monitor configuration with a hash of its content
///
/// Equality and hashing use only the content hash, so "did this monitor's effective
/// configuration change" is a cheap comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfigInstance {
    config: MonitorConfiguration,
    hash: String,
}

impl MonitorConfigInstance {
    /// Wrap a configuration, computing its hash
    pub fn new(config: MonitorConfiguration) -> Self {
        let hash = content_hash(&config);
        Self { config, hash }
    }

    /// The wrapped configuration
    pub fn config(&self) -> &MonitorConfiguration {
        &self.config
    }

    /// ID of the wrapped monitor
    pub fn id(&self) -> &MonitorId {
        &self.config.id
    }

    /// Hex-encoded SHA-256 of the configuration's JSON form
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

fn content_hash(config: &MonitorConfiguration) -> String {
    let json = serde_json::to_vec(config).unwrap_or_default();
    hex::encode(Sha256::digest(&json))
}

impl PartialEq for MonitorConfigInstance {
    fn eq(&self, other: &Self) -> bool {
        self.hash.eq_ignore_ascii_case(&other.hash)
    }
}

impl Eq for MonitorConfigInstance {}

impl Hash for MonitorConfigInstance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.to_ascii_lowercase().hash(state);
    }
}
