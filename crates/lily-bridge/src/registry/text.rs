use std::collections::HashSet;
use std::time::Duration;

use lily_common::GuildSessionKey;
use tokio::time::Instant;

/// Conversation state for one text channel.
#[derive(Debug, Clone)]
pub struct TextContext {
    key: GuildSessionKey,
    last_user_id: Option<String>,
    open: HashSet<String>,
    last_activity: Instant,
}

impl TextContext {
    pub(crate) fn new(key: GuildSessionKey, now: Instant) -> Self {
        Self {
            key,
            last_user_id: None,
            open: HashSet::new(),
            last_activity: now,
        }
    }

    pub fn key(&self) -> &GuildSessionKey {
        &self.key
    }

    /// Replies for this context go to its channel.
    pub fn reply_channel_id(&self) -> Option<&str> {
        self.key.channel_id()
    }

    pub fn last_user_id(&self) -> Option<&str> {
        self.last_user_id.as_deref()
    }

    pub fn set_last_user(&mut self, user_id: &str) {
        self.last_user_id = Some(user_id.to_string());
    }

    pub fn is_open(&self, user_id: &str) -> bool {
        self.open.contains(user_id)
    }

    /// Returns false if the conversation was already open.
    pub fn open_conversation(&mut self, user_id: &str) -> bool {
        self.open.insert(user_id.to_string())
    }

    /// Returns false if there was nothing to close.
    pub fn close_conversation(&mut self, user_id: &str) -> bool {
        self.open.remove(user_id)
    }

    pub fn open_conversations(&self) -> usize {
        self.open.len()
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub(crate) fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }
}
