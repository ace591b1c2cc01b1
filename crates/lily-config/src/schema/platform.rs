//! Chat-platform facing settings: the gateway the platform client connects
//! to, and how conversations are started, ended and answered.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Address the platform gateway listens on.
    pub bind_address: String,
    /// Port the platform gateway listens on.
    pub port: u16,
    /// Seconds to wait for the platform to acknowledge a voice join or leave.
    pub ack_timeout_secs: u64,
    /// Phrase that opens a conversation (case-insensitive prefix).
    pub wake_phrase: String,
    /// Phrase that closes a conversation (case-insensitive, exact).
    pub goodbye_phrase: String,
    /// Prefix put in front of every reply.
    pub reply_prefix: String,
    /// Maximum characters per platform message (valid range: 100-4000).
    pub message_limit: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            port: 8005,
            ack_timeout_secs: 10,
            wake_phrase: "hey lily".into(),
            goodbye_phrase: "goodbye lily".into(),
            reply_prefix: "**Lily:**".into(),
            message_limit: 2000,
        }
    }
}

impl PlatformConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }
}
