//! Voice session states, notices and settings.

use std::fmt;
use std::time::Duration;

use lily_config::schema::VoiceConfig;
use serde::Serialize;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle of a voice session.
///
/// Sessions are created in `Joining`. `Idle` and `Error` are terminal; a
/// session in either has released every resource it held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceState {
    Idle,
    Joining,
    Active,
    Leaving,
    Error,
}

impl VoiceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, VoiceState::Idle | VoiceState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VoiceState::Idle => "idle",
            VoiceState::Joining => "joining",
            VoiceState::Active => "active",
            VoiceState::Leaving => "leaving",
            VoiceState::Error => "error",
        }
    }
}

impl fmt::Display for VoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session is being asked to leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveReason {
    UserRequest,
    /// The backend ended the session; it is not told `voice-leave`.
    BackendClosed(Option<String>),
    Shutdown,
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

/// Sent to the bridge as a session moves through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceNotice {
    Joined {
        guild_id: String,
        channel_id: String,
        reply_channel_id: Option<String>,
    },
    Ended {
        guild_id: String,
        reply_channel_id: Option<String>,
        reason: LeaveReason,
    },
    Failed {
        guild_id: String,
        reply_channel_id: Option<String>,
        user_id: String,
        error: String,
    },
}

impl VoiceNotice {
    pub fn guild_id(&self) -> &str {
        match self {
            VoiceNotice::Joined { guild_id, .. }
            | VoiceNotice::Ended { guild_id, .. }
            | VoiceNotice::Failed { guild_id, .. } => guild_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Settings / stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct VoiceSettings {
    /// Frames buffered per direction before the oldest is dropped.
    pub queue_capacity: usize,
    /// Bound on backend ack, platform join and transcoder start together.
    pub join_timeout: Duration,
    /// Bound on the platform leaving the channel.
    pub leave_timeout: Duration,
    /// Bound on the transcoder shutting down, kill included.
    pub stop_timeout: Duration,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self::from(&VoiceConfig::default())
    }
}

impl From<&VoiceConfig> for VoiceSettings {
    fn from(config: &VoiceConfig) -> Self {
        Self {
            queue_capacity: config.frame_queue_capacity,
            join_timeout: config.join_timeout(),
            leave_timeout: config.leave_grace(),
            stop_timeout: config.leave_grace() + Duration::from_secs(2),
        }
    }
}

/// Per-session counters for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceStats {
    pub guild_id: String,
    pub channel_id: String,
    pub state: VoiceState,
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_played: u64,
    pub uplink_dropped: u64,
    pub downlink_dropped: u64,
    pub send_failures: u64,
}
