//! Ambient configuration types: session lifetimes, rate limiting, the
//! health server, service discovery and logging.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session registry lifetimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Seconds a text context may stay idle before it is evicted.
    pub idle_timeout_secs: u64,
    /// Seconds between idle sweeps.
    pub sweep_interval_secs: u64,
    /// Seconds a per-guild worker waits for work before exiting.
    pub worker_idle_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 60,
            worker_idle_secs: 300,
        }
    }
}

impl SessionsConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn worker_idle(&self) -> Duration {
        Duration::from_secs(self.worker_idle_secs)
    }
}

/// Per-user request rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 10,
            burst: 20,
        }
    }
}

/// Health and control HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: 8004,
        }
    }
}

/// Consul service registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// Consul agent address, with or without scheme.
    pub consul_address: String,
    pub service_name: String,
    pub tags: Vec<String>,
    /// Address advertised to Consul. Defaults to the machine hostname.
    pub advertise_address: Option<String>,
    /// Public domain; adds a `hostname=<service>.<domain>` tag when set.
    pub domain_name: Option<String>,
    /// Seconds between registration attempts until one succeeds.
    pub retry_interval_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            consul_address: "consul:8500".into(),
            service_name: "lily-discord-adapter".into(),
            tags: vec!["discord".into(), "adapter".into()],
            advertise_address: None,
            domain_name: None,
            retry_interval_secs: 5,
        }
    }
}

impl DiscoveryConfig {
    /// Consul base URL with a scheme.
    pub fn consul_url(&self) -> String {
        if self.consul_address.contains("://") {
            self.consul_address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", self.consul_address.trim_end_matches('/'))
        }
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

/// Log level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}
