//! Availability probes

use async_trait::async_trait;
use reqwest::Method;
use tokio::net::TcpStream;
use tracing::debug;

use crate::foundation::types::{HttpCheck, HttpMethod, TcpCheck};
use crate::foundation::{MonitorConfiguration, MonitorStatus};

/// Performs one availability check of a target
#[async_trait]
pub trait MonitorProbe: Send + Sync + 'static {
    /// Check the target described by `config`
    ///
    /// Returns `Reachable` or `NotReachable`; the caller bounds the call with the
    /// monitor's timeout.
    async fn check(&self, config: &MonitorConfiguration) -> MonitorStatus;
}

fn status_of(reachable: bool) -> MonitorStatus {
    if reachable {
        MonitorStatus::Reachable
    } else {
        MonitorStatus::NotReachable
    }
}

/// HTTP probe: status code ranges and optional body keyword
#[derive(Clone, Default)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Create a probe with its own connection pool
    pub fn new() -> Self {
        Self::default()
    }

    async fn check_http(&self, http: &HttpCheck, config: &MonitorConfiguration) -> bool {
        let method = match http.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Head => Method::HEAD,
        };

        let response = match self
            .client
            .request(method, &http.url)
            .timeout(config.timeout())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("HTTP check of {} failed: {}", config.id, e);
                return false;
            }
        };

        let status = response.status().as_u16();
        if !http.accepts_status(status) {
            debug!("HTTP check of {} got unexpected status {}", config.id, status);
            return false;
        }

        let Some(keyword) = http.keyword.as_deref().filter(|k| !k.is_empty()) else {
            return true;
        };

        match response.text().await {
            Ok(body) => body.to_lowercase().contains(&keyword.to_lowercase()),
            Err(e) => {
                debug!("HTTP check of {} could not read body: {}", config.id, e);
                false
            }
        }
    }
}

#[async_trait]
impl MonitorProbe for HttpProbe {
    async fn check(&self, config: &MonitorConfiguration) -> MonitorStatus {
        let reachable = match &config.http {
            Some(http) => self.check_http(http, config).await,
            None => false,
        };
        status_of(reachable)
    }
}

/// TCP probe: a successful connect counts as reachable
#[derive(Clone, Copy, Default)]
pub struct TcpProbe;

impl TcpProbe {
    async fn check_tcp(tcp: &TcpCheck, config: &MonitorConfiguration) -> bool {
        match TcpStream::connect((tcp.host.as_str(), tcp.port)).await {
            Ok(_) => true,
            Err(e) => {
                debug!("TCP check of {} failed: {}", config.id, e);
                false
            }
        }
    }
}

#[async_trait]
impl MonitorProbe for TcpProbe {
    async fn check(&self, config: &MonitorConfiguration) -> MonitorStatus {
        let reachable = match &config.tcp {
            Some(tcp) => Self::check_tcp(tcp, config).await,
            None => false,
        };
        status_of(reachable)
    }
}

/// Dispatches to the HTTP or TCP probe depending on the configuration
#[derive(Clone, Default)]
pub struct DefaultProbe {
    http: HttpProbe,
    tcp: TcpProbe,
}

impl DefaultProbe {
    /// Create a probe
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MonitorProbe for DefaultProbe {
    async fn check(&self, config: &MonitorConfiguration) -> MonitorStatus {
        if config.http.is_some() {
            self.http.check(config).await
        } else if config.tcp.is_some() {
            self.tcp.check(config).await
        } else {
            MonitorStatus::Unknown
        }
    }
}
