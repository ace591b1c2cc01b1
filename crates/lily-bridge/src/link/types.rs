//! Configuration, state and event types for the backend link.

use std::time::Duration;

use lily_config::schema::BackendConfig;
use serde::Serialize;

use crate::protocol::Envelope;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Timing and capacity knobs for [`BackendLink`](super::BackendLink).
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub reconnect_jitter: f64,
    pub max_reconnect_attempts: Option<u32>,
    pub outbound_queue: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::from(&BackendConfig::default())
    }
}

impl From<&BackendConfig> for LinkConfig {
    fn from(config: &BackendConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            reconnect_base: config.reconnect_base(),
            reconnect_max: config.reconnect_max(),
            reconnect_jitter: config.reconnect_jitter,
            max_reconnect_attempts: config.max_reconnect_attempts,
            outbound_queue: config.outbound_queue.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// State and events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Shutting down; no further reconnects.
    Draining,
}

/// Everything the link reports to its owner.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Connected,
    Disconnected { reason: String },
    /// A backend frame that is not the answer to one of our requests.
    Envelope(Envelope),
    /// Reconnect attempts exhausted; the link has stopped for good.
    Fatal { attempts: u32 },
}

/// Counters exposed on the health endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkStats {
    pub state: Option<LinkState>,
    pub pending_requests: usize,
    pub unmatched_responses: u64,
    pub reconnects: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub connected_since: Option<chrono::DateTime<chrono::Utc>>,
}
