//! Per-guild session state: text conversation contexts and voice sessions.
//!
//! Text contexts are keyed by guild and channel and expire after an idle
//! window, checked lazily on access and by a periodic sweep. Voice sessions
//! are keyed by guild and never expire; they leave the registry only when
//! the session itself finishes.

mod text;


pub use text::TextContext;

use std::collections::HashMap;
use std::time::Duration;

use lily_common::{BridgeError, GuildSessionKey};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::voice::VoiceSessionHandle;

/// Thread-safe session map. Locks are only ever held for synchronous work.
pub struct SessionRegistry {
    text: RwLock<HashMap<GuildSessionKey, TextContext>>,
    voice: RwLock<HashMap<String, VoiceSessionHandle>>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            text: RwLock::new(HashMap::new()),
            voice: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    // -- text ---------------------------------------------------------------

    /// Run `f` on the context for `key`, creating it (or replacing an
    /// expired one) first. Marks the context active.
    pub async fn text_context<R>(
        &self,
        key: &GuildSessionKey,
        f: impl FnOnce(&mut TextContext) -> R,
    ) -> R {
        let now = Instant::now();
        let mut map = self.text.write().await;
        let expired = map
            .get(key)
            .is_some_and(|ctx| ctx.is_idle(now, self.idle_timeout));
        if expired {
            debug!(key = %key, "text context expired");
            map.remove(key);
        }
        let ctx = map
            .entry(key.clone())
            .or_insert_with(|| TextContext::new(key.clone(), now));
        ctx.touch(now);
        f(ctx)
    }

    /// Read a context without creating or touching it.
    pub async fn peek_text<R>(
        &self,
        key: &GuildSessionKey,
        f: impl FnOnce(&TextContext) -> R,
    ) -> Option<R> {
        let now = Instant::now();
        let map = self.text.read().await;
        map.get(key)
            .filter(|ctx| !ctx.is_idle(now, self.idle_timeout))
            .map(f)
    }

    // -- voice --------------------------------------------------------------

    /// Register a new voice session. Fails when the guild already has one,
    /// whatever state it is in.
    pub async fn insert_voice(&self, handle: VoiceSessionHandle) -> Result<(), BridgeError> {
        let mut map = self.voice.write().await;
        let guild_id = handle.guild_id().to_string();
        if let Some(existing) = map.get(&guild_id) {
            if !existing.is_finished() {
                return Err(BridgeError::AlreadyActive { guild_id });
            }
            debug!(guild_id = %guild_id, "replacing finished voice session");
        }
        map.insert(guild_id, handle);
        Ok(())
    }

    pub async fn voice(&self, guild_id: &str) -> Option<VoiceSessionHandle> {
        self.voice.read().await.get(guild_id).cloned()
    }

    /// Remove the voice entry for `guild_id` if it still belongs to
    /// `session_id`. A newer session for the same guild is left alone.
    pub async fn remove_voice_session(&self, guild_id: &str, session_id: u64) -> bool {
        let mut map = self.voice.write().await;
        if map.get(guild_id).is_some_and(|h| h.session_id() == session_id) {
            map.remove(guild_id);
            info!(guild_id, session_id, "voice session removed");
            true
        } else {
            false
        }
    }

    // -- shared -------------------------------------------------------------

    /// Remove whatever lives at `key`: the voice session for a guild-wide
    /// key, the text context otherwise. A voice session is only removed once
    /// its task has ended in a terminal state; a live one is left alone.
    pub async fn remove(&self, key: &GuildSessionKey) -> bool {
        if key.is_guild_wide() {
            let mut map = self.voice.write().await;
            if map.get(key.guild_id()).is_some_and(is_reclaimable) {
                map.remove(key.guild_id());
                true
            } else {
                false
            }
        } else {
            self.text.write().await.remove(key).is_some()
        }
    }

    /// Call `f` for every voice session that has not finished.
    pub async fn for_each_active(&self, mut f: impl FnMut(&VoiceSessionHandle)) {
        let map = self.voice.read().await;
        for handle in map.values().filter(|h| !h.state().is_terminal()) {
            f(handle);
        }
    }

    /// Live text contexts plus voice sessions that have not finished.
    pub async fn active_count(&self) -> usize {
        self.text_count().await + self.voice_count().await
    }

    pub async fn text_count(&self) -> usize {
        let now = Instant::now();
        self.text
            .read()
            .await
            .values()
            .filter(|ctx| !ctx.is_idle(now, self.idle_timeout))
            .count()
    }

    pub async fn voice_count(&self) -> usize {
        self.voice
            .read()
            .await
            .values()
            .filter(|h| !h.state().is_terminal())
            .count()
    }

    /// Drop idle text contexts and voice entries whose task is gone.
    /// Returns how many entries were removed.
    pub async fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let text_removed = {
            let mut map = self.text.write().await;
            let before = map.len();
            map.retain(|_, ctx| !ctx.is_idle(now, self.idle_timeout));
            before - map.len()
        };
        let voice_removed = {
            let mut map = self.voice.write().await;
            let before = map.len();
            map.retain(|_, h| !is_reclaimable(h));
            before - map.len()
        };
        let removed = text_removed + voice_removed;
        if removed > 0 {
            debug!(text_removed, voice_removed, "session sweep");
        }
        removed
    }
}

/// The session task is gone and left the session in `Idle` or `Error`.
fn is_reclaimable(handle: &VoiceSessionHandle) -> bool {
    handle.is_finished() && handle.state().is_terminal()
}
