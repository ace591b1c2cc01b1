//! Backend WebSocket link configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection, heartbeat and reconnect settings for the backend link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Static WebSocket URL of the backend. Empty when discovered via Consul.
    pub url: String,
    /// Consul service name to resolve the backend from (e.g. "lily-core").
    pub discovery_service: Option<String>,
    /// Consul tag the backend instance must carry.
    pub discovery_tag: String,
    /// Seconds to wait for the WebSocket handshake (valid range: 1-120).
    pub connect_timeout_secs: u64,
    /// Seconds a request waits for its response (valid range: 1-600).
    pub request_timeout_secs: u64,
    /// Milliseconds between heartbeat pings (valid range: 100-300000).
    pub heartbeat_interval_ms: u64,
    /// Milliseconds without a pong before the link is declared dead.
    pub heartbeat_timeout_ms: u64,
    /// First reconnect delay in milliseconds.
    pub reconnect_base_ms: u64,
    /// Upper bound for the reconnect delay in milliseconds.
    pub reconnect_max_ms: u64,
    /// Random extra delay as a fraction of the current delay (0.0-1.0).
    pub reconnect_jitter: f64,
    /// Give up after this many consecutive failed attempts. Unset retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Capacity of the outbound frame queue.
    pub outbound_queue: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "ws://lily-core:8000/ws".into(),
            discovery_service: None,
            discovery_tag: "websocket".into(),
            connect_timeout_secs: 15,
            request_timeout_secs: 30,
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 45_000,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 30_000,
            reconnect_jitter: 0.2,
            max_reconnect_attempts: None,
            outbound_queue: 256,
        }
    }
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}
