//! Consul service discovery.
//!
//! [`Registrar`] announces the adapter to the local Consul agent with an
//! HTTP health check against `/health`, retrying until the agent accepts
//! it, and removes the registration on shutdown. [`ConsulResolver`] looks
//! the backend up among the passing instances before every connect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lily_bridge::EndpointResolver;
use lily_common::{new_correlation_id, LinkError};
use lily_config::schema::DiscoveryConfig;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("consul request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no passing instance of {0}")]
    NoInstance(String),
}

fn http_client() -> Result<reqwest::Client, DiscoveryError> {
    Ok(reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

/// Hostname advertised to Consul when no address is configured.
fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
struct Registration {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Tags")]
    tags: Vec<String>,
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Check")]
    check: HealthCheck,
}

#[derive(Debug, Clone, Serialize)]
struct HealthCheck {
    #[serde(rename = "HTTP")]
    http: String,
    #[serde(rename = "Interval")]
    interval: String,
    #[serde(rename = "Timeout")]
    timeout: String,
    #[serde(rename = "DeregisterCriticalServiceAfter")]
    deregister_critical_service_after: String,
}

impl Registration {
    fn new(config: &DiscoveryConfig, port: u16, host: &str) -> Self {
        let mut tags = config.tags.clone();
        if let Some(domain) = config.domain_name.as_deref().filter(|d| !d.is_empty()) {
            tags.push(format!("hostname={}.{}", config.service_name, domain));
        }
        let address = config
            .advertise_address
            .clone()
            .unwrap_or_else(|| host.to_string());
        Self {
            id: format!("{}-{}-{}", config.service_name, host, new_correlation_id()),
            name: config.service_name.clone(),
            tags,
            check: HealthCheck {
                http: format!("http://{address}:{port}/health"),
                interval: "10s".into(),
                timeout: "2s".into(),
                deregister_critical_service_after: "1m".into(),
            },
            address,
            port,
        }
    }
}

/// Registers this adapter with the Consul agent. Cheap to clone.
#[derive(Clone)]
pub struct Registrar {
    client: reqwest::Client,
    consul_url: String,
    registration: Arc<Registration>,
    retry_interval: Duration,
}

impl Registrar {
    /// `port` is the health server port Consul checks.
    pub fn from_config(config: &DiscoveryConfig, port: u16) -> Result<Self, DiscoveryError> {
        Ok(Self {
            client: http_client()?,
            consul_url: config.consul_url(),
            registration: Arc::new(Registration::new(config, port, &local_hostname())),
            retry_interval: config.retry_interval(),
        })
    }

    pub fn service_id(&self) -> &str {
        &self.registration.id
    }

    pub async fn register(&self) -> Result<(), DiscoveryError> {
        let url = format!("{}/v1/agent/service/register", self.consul_url);
        self.client
            .put(url)
            .json(self.registration.as_ref())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Keep trying until Consul accepts the registration. Returns false if
    /// cancelled first.
    pub async fn register_until_done(&self, cancel: CancellationToken) -> bool {
        loop {
            info!(
                service = %self.registration.name,
                id = %self.registration.id,
                consul = %self.consul_url,
                "registering with consul"
            );
            match self.register().await {
                Ok(()) => {
                    info!(id = %self.registration.id, "registered with consul");
                    return true;
                }
                Err(e) => warn!(
                    error = %e,
                    retry_in = ?self.retry_interval,
                    "consul registration failed"
                ),
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    pub async fn deregister(&self) {
        let url = format!(
            "{}/v1/agent/service/deregister/{}",
            self.consul_url, self.registration.id
        );
        let result = self
            .client
            .put(url)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => info!(id = %self.registration.id, "deregistered from consul"),
            Err(e) => warn!(error = %e, "consul deregistration failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Backend lookup
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Node", default)]
    node: Option<NodeInfo>,
    #[serde(rename = "Service")]
    service: ServiceInfo,
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    #[serde(rename = "Address", default)]
    address: String,
}

#[derive(Debug, Deserialize)]
struct ServiceInfo {
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Tags", default)]
    tags: Option<Vec<String>>,
}

/// WebSocket URL of the first passing instance. A `hostname=` tag means the
/// instance is published behind TLS.
fn select_endpoint(entries: &[HealthEntry]) -> Option<String> {
    let entry = entries.first()?;
    let service = &entry.service;
    let public = service
        .tags
        .iter()
        .flatten()
        .find_map(|tag| tag.strip_prefix("hostname="));
    if let Some(host) = public {
        return Some(format!("wss://{host}/ws"));
    }
    let address = if service.address.is_empty() {
        entry.node.as_ref().map(|n| n.address.as_str())?
    } else {
        service.address.as_str()
    };
    Some(format!("ws://{address}:{}/ws", service.port))
}

/// Resolves the backend URL through Consul.
pub struct ConsulResolver {
    client: reqwest::Client,
    consul_url: String,
    service: String,
    tag: String,
}

impl ConsulResolver {
    pub fn new(config: &DiscoveryConfig, service: &str, tag: &str) -> Result<Self, DiscoveryError> {
        Ok(Self {
            client: http_client()?,
            consul_url: config.consul_url(),
            service: service.to_string(),
            tag: tag.to_string(),
        })
    }

    async fn lookup(&self) -> Result<String, DiscoveryError> {
        let url = format!("{}/v1/health/service/{}", self.consul_url, self.service);
        let mut query = vec![("passing", "true")];
        if !self.tag.is_empty() {
            query.push(("tag", self.tag.as_str()));
        }
        let entries: Vec<HealthEntry> = self
            .client
            .get(url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let endpoint = select_endpoint(&entries)
            .ok_or_else(|| DiscoveryError::NoInstance(self.service.clone()))?;
        debug!(service = %self.service, endpoint = %endpoint, "backend resolved");
        Ok(endpoint)
    }
}

#[async_trait]
impl EndpointResolver for ConsulResolver {
    async fn resolve(&self) -> Result<String, LinkError> {
        self.lookup()
            .await
            .map_err(|e| LinkError::Resolve(e.to_string()))
    }
}
