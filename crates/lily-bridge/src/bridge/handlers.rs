//! What a guild worker does with each piece of work.

use std::sync::atomic::Ordering;

use lily_common::{BridgeError, TranslationError};
use tracing::{debug, info, warn};

use super::dispatch::Work;
use super::Bridge;
use crate::platform::{
    MusicAction, MusicRequest, PlatformEvent, TextMessage, VoiceJoinRequest, VoiceLeaveRequest,
};
use crate::protocol::TextIntent;
use crate::translator::{
    format_reply, response_action, translate_text, voice_join_envelope, PlatformAction,
    ReplyTarget, Translated,
};
use crate::voice::{LeaveReason, VoiceNotice, VoiceSession};

const APOLOGY: &str =
    "I'm having trouble connecting to my brain right now. Please try again later.";
const SLOW_DOWN: &str = "You're sending messages too quickly. Please slow down.";
const ALREADY_IN_VOICE: &str = "I'm already in a voice channel in this server.";
const NOT_IN_VOICE: &str = "I'm not connected to a voice channel in this server.";
const VOICE_DISABLED: &str = "Voice conversations are turned off.";
const PLAYING_MUSIC: &str = "I'm playing music in this server. Use /stop first.";
const MUSIC_DISABLED: &str = "Music playback is turned off.";
const IN_CONVERSATION: &str = "I'm in a voice conversation in this server right now.";
const USER_NOT_IN_VOICE: &str = "You are not connected to a voice channel.";
const NOTHING_PLAYING: &str = "Nothing is currently playing.";

impl Bridge {
    pub(super) async fn handle(&self, work: Work) {
        match work {
            Work::Platform(PlatformEvent::TextMessage(msg)) => self.handle_text(msg).await,
            Work::Platform(PlatformEvent::VoiceJoinRequest(req)) => {
                self.handle_voice_join(req).await
            }
            Work::Platform(PlatformEvent::VoiceLeaveRequest(req)) => {
                self.handle_voice_leave(req).await
            }
            Work::Platform(PlatformEvent::Music(req)) => self.handle_music(req).await,
            Work::Action(action) => self.perform(action).await,
            Work::Notice(notice) => self.handle_notice(notice).await,
        }
    }

    // -- text ---------------------------------------------------------------

    async fn handle_text(&self, msg: TextMessage) {
        if msg.from_bot {
            return;
        }
        let key = msg.session_key();
        let open = self
            .inner
            .registry
            .text_context(&key, |ctx| {
                ctx.set_last_user(&msg.user_id);
                ctx.is_open(&msg.user_id)
            })
            .await;

        let (envelope, intent) = match translate_text(&msg, open, &self.inner.settings.phrases) {
            Ok(Translated::Request { envelope, intent }) => (envelope, intent),
            Ok(Translated::Hint) => {
                let hint = format!(
                    "Hi! Say **'{}'** to wake me up and start a conversation.",
                    title_case(self.inner.settings.phrases.wake())
                );
                self.notify(&msg.channel_id, &hint).await;
                return;
            }
            Ok(Translated::Ignored) => return,
            Err(e) => {
                self.count_translation_error();
                info!(channel_id = %msg.channel_id, user_id = %msg.user_id, error = %e, "message not forwarded");
                self.notify(&msg.channel_id, &translation_notice(&e)).await;
                return;
            }
        };

        if let Some(limiter) = &self.inner.limiter {
            if let Err(e) = limiter.check(&msg.user_id) {
                self.inner
                    .counters
                    .rate_limited
                    .fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "rate limited");
                self.notify(&msg.channel_id, SLOW_DOWN).await;
                return;
            }
        }

        match intent {
            TextIntent::SessionStart => {
                self.inner
                    .registry
                    .text_context(&key, |ctx| ctx.open_conversation(&msg.user_id))
                    .await;
                info!(key = %key, user_id = %msg.user_id, "conversation started");
            }
            TextIntent::SessionEnd => {
                self.inner
                    .registry
                    .text_context(&key, |ctx| ctx.close_conversation(&msg.user_id))
                    .await;
                info!(key = %key, user_id = %msg.user_id, "conversation ended");
            }
            TextIntent::SessionNoActive | TextIntent::Message => {}
        }

        self.inner
            .counters
            .backend_requests
            .fetch_add(1, Ordering::Relaxed);
        let response = match self.inner.link.request(envelope).await {
            Ok(response) => response,
            Err(e) => {
                self.inner
                    .counters
                    .backend_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "backend request failed");
                self.notify(&msg.channel_id, APOLOGY).await;
                return;
            }
        };

        match response_action(&response, &msg.channel_id) {
            Ok(action) => self.perform(action).await,
            Err(e) => {
                self.count_translation_error();
                warn!(id = %response.id(), error = %e, "unusable backend response");
            }
        }
    }

    // -- voice --------------------------------------------------------------

    async fn handle_voice_join(&self, req: VoiceJoinRequest) {
        let reply_to = req.reply_channel_id.clone();
        if !self.inner.settings.voice_enabled {
            debug!(error = %BridgeError::VoiceDisabled, "voice join refused");
            self.notify_opt(reply_to.as_deref(), VOICE_DISABLED).await;
            return;
        }
        if self
            .inner
            .music
            .as_ref()
            .is_some_and(|music| music.is_active(&req.guild_id))
        {
            info!(guild_id = %req.guild_id, "voice join refused while music plays");
            self.notify_opt(reply_to.as_deref(), PLAYING_MUSIC).await;
            return;
        }
        if let Err(e) = voice_join_envelope(&req) {
            self.count_translation_error();
            self.notify_opt(reply_to.as_deref(), &translation_notice(&e))
                .await;
            return;
        }

        let (session, handle) = VoiceSession::new(req, self.inner.settings.voice.clone());
        match self.inner.registry.insert_voice(handle).await {
            Ok(()) => {
                self.inner
                    .counters
                    .voice_sessions_started
                    .fetch_add(1, Ordering::Relaxed);
                tokio::spawn(session.run(self.voice_deps()));
            }
            Err(e @ BridgeError::AlreadyActive { .. }) => {
                info!(error = %e, "voice join refused");
                self.notify_opt(reply_to.as_deref(), ALREADY_IN_VOICE).await;
            }
            Err(e) => warn!(error = %e, "voice join failed"),
        }
    }

    async fn handle_voice_leave(&self, req: VoiceLeaveRequest) {
        let session = self
            .inner
            .registry
            .voice(&req.guild_id)
            .await
            .filter(|h| !h.state().is_terminal());
        match session {
            Some(handle) => {
                if !handle.request_leave(LeaveReason::UserRequest) {
                    debug!(guild_id = %req.guild_id, "voice session already leaving");
                }
            }
            None => {
                let err = BridgeError::NoVoiceSession {
                    guild_id: req.guild_id.clone(),
                };
                debug!(error = %err, "voice leave ignored");
                self.notify_opt(req.reply_channel_id.as_deref(), NOT_IN_VOICE)
                    .await;
            }
        }
    }

    // -- music --------------------------------------------------------------

    /// Music replies go out plain, without the assistant prefix.
    async fn handle_music(&self, req: MusicRequest) {
        let reply_to = req.reply_channel_id.as_str();
        let Some(music) = &self.inner.music else {
            self.send(reply_to, MUSIC_DISABLED).await;
            return;
        };
        match req.action {
            MusicAction::Play { query } if query.trim().is_empty() => {
                self.send(reply_to, "Tell me what to play: a link or a search.")
                    .await;
            }
            MusicAction::Play { query } => {
                let Some(voice_channel) = req.voice_channel_id.as_deref() else {
                    self.send(reply_to, USER_NOT_IN_VOICE).await;
                    return;
                };
                let conversation = self
                    .inner
                    .registry
                    .voice(&req.guild_id)
                    .await
                    .is_some_and(|h| !h.state().is_terminal());
                if conversation {
                    info!(guild_id = %req.guild_id, "music refused during voice conversation");
                    self.send(reply_to, IN_CONVERSATION).await;
                    return;
                }
                music.play(&req.guild_id, voice_channel, query.trim(), reply_to);
            }
            MusicAction::Skip => {
                if !music.skip(&req.guild_id, reply_to) {
                    self.send(reply_to, NOTHING_PLAYING).await;
                }
            }
            MusicAction::Stop => {
                if !music.stop(&req.guild_id, reply_to) {
                    self.send(reply_to, NOTHING_PLAYING).await;
                }
            }
        }
    }

    async fn handle_notice(&self, notice: VoiceNotice) {
        match notice {
            VoiceNotice::Joined {
                channel_id,
                reply_channel_id,
                ..
            } => {
                let text = format!("Joined <#{channel_id}>. I'm listening!");
                self.notify_opt(reply_channel_id.as_deref(), &text).await;
            }
            VoiceNotice::Ended {
                reply_channel_id,
                reason,
                ..
            } => {
                let text = match reason {
                    LeaveReason::UserRequest => "Left the voice channel.".to_string(),
                    LeaveReason::BackendClosed(Some(reason)) => {
                        format!("Voice session ended: {reason}")
                    }
                    LeaveReason::BackendClosed(None) => "Voice session ended.".to_string(),
                    LeaveReason::Shutdown => return,
                };
                self.notify_opt(reply_channel_id.as_deref(), &text).await;
            }
            VoiceNotice::Failed {
                reply_channel_id,
                user_id,
                error,
                ..
            } => {
                let text = format!("<@{user_id}> voice session failed: {error}");
                self.notify_opt(reply_channel_id.as_deref(), &text).await;
            }
        }
    }

    // -- output -------------------------------------------------------------

    /// Carry out a platform action produced by the translator.
    pub(super) async fn perform(&self, action: PlatformAction) {
        match action {
            PlatformAction::SendText { target, text } => {
                let Some(channel) = self.resolve(&target).await else {
                    warn!(target = ?target, "no channel for backend reply");
                    return;
                };
                for chunk in format_reply(&text, &self.inner.settings.reply) {
                    self.send(&channel, &chunk).await;
                }
            }
            PlatformAction::ErrorNotice { target, message } => {
                let channel = match &target {
                    Some(target) => self.resolve(target).await,
                    None => None,
                };
                match channel {
                    Some(channel) => self.notify(&channel, &message).await,
                    None => warn!(message = %message, "backend error with no destination"),
                }
            }
            PlatformAction::PlayAudio { guild_id, frame } => {
                if let Some(handle) = self.inner.registry.voice(&guild_id).await {
                    handle.deliver_frame(frame);
                }
            }
            PlatformAction::VoiceSessionClosed { guild_id, reason } => {
                if let Some(handle) = self.inner.registry.voice(&guild_id).await {
                    handle.request_leave(LeaveReason::BackendClosed(reason));
                }
            }
            PlatformAction::Ignore => {}
        }
    }

    async fn resolve(&self, target: &ReplyTarget) -> Option<String> {
        match target {
            ReplyTarget::Channel(channel) => Some(channel.clone()),
            ReplyTarget::VoiceSession(guild_id) => self
                .inner
                .registry
                .voice(guild_id)
                .await
                .and_then(|h| h.reply_channel_id().map(str::to_string)),
        }
    }

    /// One prefixed line to `channel`.
    async fn notify(&self, channel: &str, text: &str) {
        let line = self.inner.settings.reply.line(text);
        self.send(channel, &line).await;
    }

    async fn notify_opt(&self, channel: Option<&str>, text: &str) {
        match channel {
            Some(channel) => self.notify(channel, text).await,
            None => debug!(text, "no reply channel for notice"),
        }
    }

    async fn send(&self, channel: &str, text: &str) {
        if let Err(e) = self.inner.platform.send_text(channel, text).await {
            warn!(channel_id = channel, error = %e, "failed to send message");
        }
    }

    fn count_translation_error(&self) {
        self.inner
            .counters
            .translation_errors
            .fetch_add(1, Ordering::Relaxed);
    }
}

fn translation_notice(err: &TranslationError) -> String {
    match err {
        TranslationError::EmptyMessage => "I didn't catch anything in that message.".to_string(),
        TranslationError::InvalidPayload(_) => {
            "I can only listen to audio attachments right now.".to_string()
        }
        other => format!("I couldn't process that: {other}."),
    }
}

fn title_case(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
