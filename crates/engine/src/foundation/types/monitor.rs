//! Monitor identity, status and configuration

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{EngineResult, Error};
use crate::foundation::types::CheckSchedule;

/// Case-insensitive monitor identifier, stored lowercase
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct MonitorId(String);

impl MonitorId {
    /// Create a monitor ID
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().to_lowercase())
    }

    /// Get the ID as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MonitorId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<&str> for MonitorId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<MonitorId> for String {
    fn from(id: MonitorId) -> Self {
        id.0
    }
}

/// Availability of a monitored target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    /// Nothing observed yet
    #[default]
    Unknown,
    /// Target answered as expected
    Reachable,
    /// Target did not answer as expected
    NotReachable,
    /// Only some observers saw the target as reachable
    PartiallyReachable,
}

/// HTTP method used by an HTTP check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    /// GET request
    #[default]
    Get,
    /// HEAD request
    Head,
}

/// Accepted HTTP status codes: a single code (`"200"`) or an inclusive range (`"200-299"`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCodeRange(String);

impl StatusCodeRange {
    /// Create a range from its textual form
    pub fn new(range: impl Into<String>) -> Self {
        Self(range.into())
    }

    /// Parse into inclusive bounds
    pub fn bounds(&self) -> Option<(u16, u16)> {
        match self.0.split_once('-') {
            Some((lower, upper)) => {
                let lower = lower.trim().parse().ok()?;
                let upper = upper.trim().parse().ok()?;
                Some((lower, upper))
            }
            None => {
                let code = self.0.trim().parse().ok()?;
                Some((code, code))
            }
        }
    }

    /// Whether `code` falls inside this range
    pub fn contains(&self, code: u16) -> bool {
        self.bounds()
            .is_some_and(|(lower, upper)| lower <= code && code <= upper)
    }
}

/// HTTP probe settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpCheck {
    /// URL to request
    pub url: String,
    /// Keyword that must appear in the response body (case-insensitive)
    #[serde(default)]
    pub keyword: Option<String>,
    /// Request method
    #[serde(default)]
    pub method: HttpMethod,
    /// Accepted status codes; any 2xx when empty
    #[serde(default)]
    pub status_codes: Vec<StatusCodeRange>,
}

impl HttpCheck {
    /// Whether a response status counts as a successful check
    pub fn accepts_status(&self, code: u16) -> bool {
        if self.status_codes.is_empty() {
            return (200..300).contains(&code);
        }
        self.status_codes.iter().any(|range| range.contains(code))
    }
}

/// TCP probe settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpCheck {
    /// Host to connect to
    pub host: String,
    /// Port to connect to
    pub port: u16,
}

/// Configuration of one monitored target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfiguration {
    /// Monitor ID
    pub id: MonitorId,

    /// Display name
    #[serde(default)]
    pub display_name: String,

    /// Number of nodes that should independently check this monitor
    #[serde(default = "default_check_with")]
    pub check_with: usize,

    /// Check schedule: 5- or 6-field cron expression or `@every <duration>`
    pub interval: String,

    /// Check timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,

    /// Reachable-vote fraction (>=) at which the target counts as reachable
    #[serde(default = "default_available_threshold")]
    pub available_threshold: f64,

    /// Reachable-vote fraction (>=) at which the target counts as partially reachable
    #[serde(default = "default_partial_threshold")]
    pub partial_threshold: f64,

    /// HTTP probe
    #[serde(default)]
    pub http: Option<HttpCheck>,

    /// TCP probe
    #[serde(default)]
    pub tcp: Option<TcpCheck>,
}

fn default_check_with() -> usize {
    1
}

fn default_timeout_secs() -> f64 {
    10.0
}

fn default_available_threshold() -> f64 {
    1.0
}

/// Longest accepted check timeout
pub const MAX_TIMEOUT_SECS: f64 = 3600.0;

fn default_partial_threshold() -> f64 {
    0.5
}

impl MonitorConfiguration {
    /// Parsed check schedule
    pub fn schedule(&self) -> EngineResult<CheckSchedule> {
        self.interval.parse()
    }

    /// Check timeout
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::try_from_secs_f64(self.timeout_secs).unwrap_or_default()
    }

    /// Validate this monitor in isolation
    pub fn validate(&self) -> EngineResult<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(Error::validation("monitor id must not be empty"));
        }

        self.schedule().map_err(|e| {
            Error::validation(format!("monitor {}: invalid interval: {}", self.id, e))
        })?;

        if !(self.timeout_secs > 0.0 && self.timeout_secs <= MAX_TIMEOUT_SECS) {
            return Err(Error::validation(format!(
                "monitor {}: timeout must be positive and at most {} seconds",
                self.id, MAX_TIMEOUT_SECS
            )));
        }

        for (name, threshold) in [
            ("available_threshold", self.available_threshold),
            ("partial_threshold", self.partial_threshold),
        ] {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(Error::validation(format!(
                    "monitor {}: {} must be between 0 and 1",
                    self.id, name
                )));
            }
        }

        if self.partial_threshold > self.available_threshold {
            return Err(Error::validation(format!(
                "monitor {}: partial_threshold must not exceed available_threshold",
                self.id
            )));
        }

        match (&self.http, &self.tcp) {
            (Some(http), None) => {
                Url::parse(&http.url).map_err(|e| {
                    Error::validation(format!("monitor {}: invalid url: {}", self.id, e))
                })?;
                if let Some(range) = http.status_codes.iter().find(|r| r.bounds().is_none()) {
                    return Err(Error::validation(format!(
                        "monitor {}: invalid status code range {:?}",
                        self.id, range
                    )));
                }
            }
            (None, Some(tcp)) => {
                if tcp.host.trim().is_empty() {
                    return Err(Error::validation(format!(
                        "monitor {}: tcp host must not be empty",
                        self.id
                    )));
                }
            }
            _ => {
                return Err(Error::validation(format!(
                    "monitor {}: exactly one of http or tcp must be configured",
                    self.id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_monitor() -> MonitorConfiguration {
        MonitorConfiguration {
            id: MonitorId::new("Web"),
            display_name: "Website".to_string(),
            check_with: 3,
            interval: "@every 30s".to_string(),
            timeout_secs: 5.0,
            available_threshold: 1.0,
            partial_threshold: 0.5,
            http: Some(HttpCheck {
                url: "https://example.com/health".to_string(),
                keyword: None,
                method: HttpMethod::Get,
                status_codes: vec![StatusCodeRange::new("200-299"), StatusCodeRange::new("301")],
            }),
            tcp: None,
        }
    }

    #[test]
    fn test_monitor_id_is_case_insensitive() {
        assert_eq!(MonitorId::new("MyMonitor"), MonitorId::new("mymonitor"));
        let parsed: MonitorId = serde_json::from_str("\"UPPER\"").unwrap();
        assert_eq!(parsed.as_str(), "upper");
    }

    #[test]
    fn test_status_code_ranges() {
        let check = http_monitor().http.unwrap();
        assert!(check.accepts_status(204));
        assert!(check.accepts_status(301));
        assert!(!check.accepts_status(302));
        assert!(!check.accepts_status(500));

        let default = HttpCheck {
            status_codes: Vec::new(),
            ..check
        };
        assert!(default.accepts_status(200));
        assert!(!default.accepts_status(404));
    }

    #[test]
    fn test_valid_monitor_passes() {
        http_monitor().validate().unwrap();
    }

    #[test]
    fn test_partial_above_available_rejected() {
        let mut monitor = http_monitor();
        monitor.partial_threshold = 0.9;
        monitor.available_threshold = 0.8;
        assert!(monitor.validate().is_err());
    }

    #[test]
    fn test_probe_must_be_exactly_one() {
        let mut monitor = http_monitor();
        monitor.tcp = Some(TcpCheck {
            host: "localhost".to_string(),
            port: 22,
        });
        assert!(monitor.validate().is_err());

        monitor.http = None;
        monitor.tcp = None;
        assert!(monitor.validate().is_err());
    }

    #[test]
    fn test_invalid_interval_and_timeout_rejected() {
        let mut monitor = http_monitor();
        monitor.interval = "not a schedule".to_string();
        assert!(monitor.validate().is_err());

        let mut monitor = http_monitor();
        monitor.timeout_secs = 0.0;
        assert!(monitor.validate().is_err());

        for timeout_secs in [1e13, f64::INFINITY, f64::NAN, MAX_TIMEOUT_SECS + 1.0] {
            monitor.timeout_secs = timeout_secs;
            assert!(monitor.validate().is_err(), "accepted timeout {timeout_secs}");
        }

        monitor.timeout_secs = MAX_TIMEOUT_SECS;
        assert!(monitor.validate().is_ok());
    }
}
