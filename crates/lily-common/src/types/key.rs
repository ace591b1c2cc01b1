use serde::{Deserialize, Serialize};
use std::fmt;

/// Guild id used for direct messages, which have no guild.
pub const DIRECT_MESSAGE_GUILD: &str = "@me";

/// Scope of a conversation or voice context: a guild, optionally narrowed
/// to one channel.
///
/// Voice sessions are keyed by guild only; text contexts by guild and channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GuildSessionKey {
    guild_id: String,
    channel_id: Option<String>,
}

impl GuildSessionKey {
    pub fn guild(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: None,
        }
    }

    pub fn channel(guild_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: Some(channel_id.into()),
        }
    }

    /// Key for a text channel, falling back to the direct-message guild.
    pub fn for_text(guild_id: Option<&str>, channel_id: &str) -> Self {
        Self::channel(guild_id.unwrap_or(DIRECT_MESSAGE_GUILD), channel_id)
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    pub fn is_guild_wide(&self) -> bool {
        self.channel_id.is_none()
    }

    /// The guild-wide key this key belongs to.
    pub fn to_guild(&self) -> Self {
        Self::guild(self.guild_id.clone())
    }
}

impl fmt::Display for GuildSessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.channel_id {
            Some(channel) => write!(f, "{}/{}", self.guild_id, channel),
            None => write!(f, "{}", self.guild_id),
        }
    }
}
