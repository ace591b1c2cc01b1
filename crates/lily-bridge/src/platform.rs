//! Interface to the chat-platform client.
//!
//! The client delivers decoded gateway events over a channel and exposes
//! the three primitives the bridge needs: send a message, join a voice
//! channel, leave it. Audio for a joined channel flows over the
//! [`VoiceConnection`] returned by `join_voice`.

use async_trait::async_trait;
use lily_common::{AudioFrame, GuildSessionKey, PlatformError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl Attachment {
    const AUDIO_EXTENSIONS: [&'static str; 5] = [".wav", ".mp3", ".m4a", ".flac", ".ogg"];

    pub fn is_audio(&self) -> bool {
        let name = self.filename.to_ascii_lowercase();
        Self::AUDIO_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
            || self
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.starts_with("audio/"))
    }
}

/// A message posted in a text channel or direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    /// Absent for direct messages.
    #[serde(default)]
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub from_bot: bool,
}

impl TextMessage {
    pub fn session_key(&self) -> GuildSessionKey {
        GuildSessionKey::for_text(self.guild_id.as_deref(), &self.channel_id)
    }
}

/// Ask the bot to join the voice channel a user is in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceJoinRequest {
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
    /// Text channel where the request came from; replies go there.
    #[serde(default)]
    pub reply_channel_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceLeaveRequest {
    pub guild_id: String,
    pub user_id: String,
    #[serde(default)]
    pub reply_channel_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MusicAction {
    /// A url or search text.
    Play { query: String },
    Skip,
    /// Clear the queue and leave the voice channel.
    Stop,
}

/// A music command, e.g. `/play` or `/skip`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicRequest {
    pub guild_id: String,
    /// Voice channel the user is in, if any.
    #[serde(default)]
    pub voice_channel_id: Option<String>,
    pub user_id: String,
    pub reply_channel_id: String,
    #[serde(flatten)]
    pub action: MusicAction,
}

/// Decoded gateway events the bridge consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    TextMessage(TextMessage),
    VoiceJoinRequest(VoiceJoinRequest),
    VoiceLeaveRequest(VoiceLeaveRequest),
    Music(MusicRequest),
}

impl PlatformEvent {
    /// Guild this event belongs to; events for one guild are handled in order.
    pub fn guild_id(&self) -> &str {
        match self {
            PlatformEvent::TextMessage(msg) => msg
                .guild_id
                .as_deref()
                .unwrap_or(lily_common::DIRECT_MESSAGE_GUILD),
            PlatformEvent::VoiceJoinRequest(req) => &req.guild_id,
            PlatformEvent::VoiceLeaveRequest(req) => &req.guild_id,
            PlatformEvent::Music(req) => &req.guild_id,
        }
    }

    /// Events sharing a key are handled in order. Guild events share their
    /// guild; each direct-message channel is its own flow.
    pub fn worker_key(&self) -> String {
        match self {
            PlatformEvent::TextMessage(msg) if msg.guild_id.is_none() => {
                format!("dm:{}", msg.channel_id)
            }
            event => event.guild_id().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Audio streams of a joined voice channel.
///
/// `capture` closes when the platform loses the voice connection.
#[derive(Debug)]
pub struct VoiceConnection {
    pub capture: mpsc::Receiver<AudioFrame>,
    pub playback: mpsc::Sender<AudioFrame>,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn send_text(&self, channel_id: &str, text: &str) -> Result<(), PlatformError>;

    async fn join_voice(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<VoiceConnection, PlatformError>;

    async fn leave_voice(&self, guild_id: &str) -> Result<(), PlatformError>;
}
