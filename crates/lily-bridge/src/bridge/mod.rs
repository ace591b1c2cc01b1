//! The bridge: platform events in, backend requests out, backend events
//! back to the platform.
//!
//! `run` owns the event loop. Work for one guild is handed to that guild's
//! worker task so guilds proceed concurrently while events within a guild
//! keep their order. Audio frames and session-closed notices skip the
//! workers and go straight to the voice session.

mod dispatch;
mod handlers;
mod limiter;


pub use limiter::UserRateLimiter;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lily_config::LilyConfig;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::link::{BackendLink, LinkEvent, LinkStats};
use crate::music::MusicService;
use crate::platform::{PlatformClient, PlatformEvent};
use crate::registry::SessionRegistry;
use crate::transcoder::Transcoder;
use crate::translator::{backend_event_action, PlatformAction, Phrases, ReplyStyle};
use crate::voice::{LeaveReason, VoiceBackend, VoiceDeps, VoiceNotice, VoiceSettings, VoiceStats};

use dispatch::{Work, Workers};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub phrases: Phrases,
    pub reply: ReplyStyle,
    pub voice: VoiceSettings,
    pub voice_enabled: bool,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub worker_idle: Duration,
    pub rate_limit: lily_config::schema::RateLimitConfig,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from_config(&LilyConfig::default())
    }
}

impl BridgeSettings {
    pub fn from_config(config: &LilyConfig) -> Self {
        Self {
            phrases: Phrases::from(&config.platform),
            reply: ReplyStyle::from(&config.platform),
            voice: VoiceSettings::from(&config.voice),
            voice_enabled: config.voice.enabled,
            idle_timeout: config.sessions.idle_timeout(),
            sweep_interval: config.sessions.sweep_interval(),
            worker_idle: config.sessions.worker_idle(),
            rate_limit: config.rate_limit.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Counters {
    platform_events: AtomicU64,
    ignored_while_disabled: AtomicU64,
    backend_requests: AtomicU64,
    backend_failures: AtomicU64,
    translation_errors: AtomicU64,
    rate_limited: AtomicU64,
    voice_sessions_started: AtomicU64,
}

/// Snapshot served on the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub healthy: bool,
    pub enabled: bool,
    pub active_sessions: usize,
    pub text_contexts: usize,
    pub voice_sessions: Vec<VoiceStats>,
    pub platform_events: u64,
    pub ignored_while_disabled: u64,
    pub backend_requests: u64,
    pub backend_failures: u64,
    pub translation_errors: u64,
    pub rate_limited: u64,
    pub voice_sessions_started: u64,
    pub music_players: usize,
    pub link: LinkStats,
}

/// Why [`Bridge::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Shutdown,
    /// The backend link gave up reconnecting.
    LinkFailed { attempts: u32 },
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Cheap to clone; all clones drive the same bridge.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

struct Inner {
    link: BackendLink,
    platform: Arc<dyn PlatformClient>,
    transcoder: Arc<dyn Transcoder>,
    registry: Arc<SessionRegistry>,
    music: Option<MusicService>,
    settings: BridgeSettings,
    limiter: Option<UserRateLimiter>,
    enabled: AtomicBool,
    counters: Counters,
    cancel: CancellationToken,
    notices_tx: mpsc::UnboundedSender<VoiceNotice>,
    notices_rx: Mutex<Option<mpsc::UnboundedReceiver<VoiceNotice>>>,
}

impl Bridge {
    pub fn new(
        link: BackendLink,
        platform: Arc<dyn PlatformClient>,
        transcoder: Arc<dyn Transcoder>,
        settings: BridgeSettings,
    ) -> Self {
        Self::with_music(link, platform, transcoder, None, settings)
    }

    /// Like [`Bridge::new`], with music requests served by `music`. Without
    /// it they get a "turned off" reply.
    pub fn with_music(
        link: BackendLink,
        platform: Arc<dyn PlatformClient>,
        transcoder: Arc<dyn Transcoder>,
        music: Option<MusicService>,
        settings: BridgeSettings,
    ) -> Self {
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let limiter = UserRateLimiter::from_config(&settings.rate_limit);
        Self {
            inner: Arc::new(Inner {
                link,
                platform,
                transcoder,
                registry: Arc::new(SessionRegistry::new(settings.idle_timeout)),
                music,
                settings,
                limiter,
                enabled: AtomicBool::new(true),
                counters: Counters::default(),
                cancel: CancellationToken::new(),
                notices_tx,
                notices_rx: Mutex::new(Some(notices_rx)),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    pub fn link(&self) -> &BackendLink {
        &self.inner.link
    }

    /// Healthy while the backend link is up and answering heartbeats.
    pub fn is_healthy(&self) -> bool {
        self.inner.link.is_healthy()
    }

    pub async fn active_session_count(&self) -> usize {
        self.inner.registry.active_count().await
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// While disabled, platform events are dropped. Running voice sessions
    /// carry on.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.inner.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            info!(enabled, "bridge {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub async fn stats(&self) -> BridgeStats {
        let registry = &self.inner.registry;
        let mut voice_sessions = Vec::new();
        registry
            .for_each_active(|handle| voice_sessions.push(handle.stats()))
            .await;
        let c = &self.inner.counters;
        BridgeStats {
            healthy: self.is_healthy(),
            enabled: self.is_enabled(),
            active_sessions: registry.active_count().await,
            text_contexts: registry.text_count().await,
            voice_sessions,
            platform_events: c.platform_events.load(Ordering::Relaxed),
            ignored_while_disabled: c.ignored_while_disabled.load(Ordering::Relaxed),
            backend_requests: c.backend_requests.load(Ordering::Relaxed),
            backend_failures: c.backend_failures.load(Ordering::Relaxed),
            translation_errors: c.translation_errors.load(Ordering::Relaxed),
            rate_limited: c.rate_limited.load(Ordering::Relaxed),
            voice_sessions_started: c.voice_sessions_started.load(Ordering::Relaxed),
            music_players: self.inner.music.as_ref().map_or(0, MusicService::active_count),
            link: self.inner.link.stats().await,
        }
    }

    /// Process events until shutdown, the platform stream ending, or the
    /// link giving up. Voice sessions are wound down and the link closed
    /// before returning.
    pub async fn run(
        &self,
        mut platform_events: mpsc::Receiver<PlatformEvent>,
        mut link_events: mpsc::Receiver<LinkEvent>,
    ) -> RunOutcome {
        let notices = self
            .inner
            .notices_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut notices) = notices else {
            warn!("bridge is already running");
            return RunOutcome::Shutdown;
        };

        let mut workers = Workers::new(self.clone(), self.inner.settings.worker_idle);
        let mut sweep = tokio::time::interval(self.inner.settings.sweep_interval);
        sweep.tick().await;
        info!("bridge running");

        let outcome = loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break RunOutcome::Shutdown,

                event = link_events.recv() => match event {
                    Some(LinkEvent::Envelope(envelope)) => {
                        self.on_backend_envelope(&envelope, &mut workers).await;
                    }
                    Some(LinkEvent::Connected) => info!("backend link connected"),
                    Some(LinkEvent::Disconnected { reason }) => {
                        warn!(reason = %reason, "backend link disconnected");
                    }
                    Some(LinkEvent::Fatal { attempts }) => {
                        break RunOutcome::LinkFailed { attempts };
                    }
                    None => {
                        info!("backend link stopped");
                        break RunOutcome::Shutdown;
                    }
                },

                event = platform_events.recv() => match event {
                    Some(event) => self.on_platform_event(event, &mut workers),
                    None => {
                        info!("platform event stream closed");
                        break RunOutcome::Shutdown;
                    }
                },

                Some(notice) = notices.recv() => {
                    let guild_id = notice.guild_id().to_string();
                    workers.dispatch(guild_id, Work::Notice(notice));
                }

                _ = sweep.tick() => {
                    self.inner.registry.sweep_idle().await;
                    if let Some(limiter) = &self.inner.limiter {
                        limiter.retain_recent();
                    }
                    workers.prune();
                }
            }
        };

        match outcome {
            RunOutcome::Shutdown => info!("bridge shutting down"),
            RunOutcome::LinkFailed { attempts } => {
                warn!(attempts, "backend unreachable, bridge stopping");
            }
        }
        // Keep the link's event queue moving while sessions wind down.
        let close = self.close();
        tokio::pin!(close);
        loop {
            tokio::select! {
                _ = &mut close => break,
                Some(event) = link_events.recv() => {
                    if let LinkEvent::Envelope(envelope) = event {
                        debug!(kind = ?envelope.kind(), "backend frame dropped during shutdown");
                    }
                }
            }
        }
        outcome
    }

    /// Stop `run`, wind down voice sessions and music, and close the backend
    /// link.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.close().await;
    }

    async fn close(&self) {
        if let Some(music) = &self.inner.music {
            music.shutdown().await;
        }
        let registry = &self.inner.registry;
        let mut asked = 0;
        registry
            .for_each_active(|handle| {
                if handle.request_leave(LeaveReason::Shutdown) {
                    asked += 1;
                }
            })
            .await;
        if asked > 0 {
            info!(sessions = asked, "leaving voice channels");
        }

        let voice = &self.inner.settings.voice;
        let bound = voice.leave_timeout + voice.stop_timeout + Duration::from_secs(1);
        let drained = tokio::time::timeout(bound, async {
            while registry.voice_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("voice sessions still running at shutdown");
        }

        self.inner.link.shutdown();
        if tokio::time::timeout(Duration::from_secs(5), self.inner.link.closed())
            .await
            .is_err()
        {
            warn!("backend link did not close in time");
        }
    }

    // -- event routing ------------------------------------------------------

    fn on_platform_event(&self, event: PlatformEvent, workers: &mut Workers) {
        if !self.is_enabled() {
            self.inner
                .counters
                .ignored_while_disabled
                .fetch_add(1, Ordering::Relaxed);
            debug!(guild_id = event.guild_id(), "bridge disabled, dropping event");
            return;
        }
        self.inner
            .counters
            .platform_events
            .fetch_add(1, Ordering::Relaxed);
        workers.dispatch(event.worker_key(), Work::Platform(event));
    }

    async fn on_backend_envelope(&self, envelope: &crate::protocol::Envelope, workers: &mut Workers) {
        let action = match backend_event_action(envelope) {
            Ok(action) => action,
            Err(e) => {
                self.inner
                    .counters
                    .translation_errors
                    .fetch_add(1, Ordering::Relaxed);
                warn!(id = %envelope.id(), kind = ?envelope.kind(), error = %e, "untranslatable backend frame");
                return;
            }
        };

        match action {
            PlatformAction::PlayAudio { guild_id, frame } => {
                match self.inner.registry.voice(&guild_id).await {
                    Some(handle) => {
                        if !handle.deliver_frame(frame) {
                            debug!(guild_id = %guild_id, "voice session not active, dropping audio");
                        }
                    }
                    None => debug!(guild_id = %guild_id, "audio for guild without a voice session"),
                }
            }
            PlatformAction::VoiceSessionClosed { guild_id, reason } => {
                match self.inner.registry.voice(&guild_id).await {
                    Some(handle) => {
                        handle.request_leave(LeaveReason::BackendClosed(reason));
                    }
                    None => debug!(guild_id = %guild_id, "session-closed for unknown voice session"),
                }
            }
            PlatformAction::Ignore => {}
            action => match dispatch::route_key(&action) {
                Some(key) => workers.dispatch(key, Work::Action(action)),
                None => warn!(action = ?action, "backend event has no destination"),
            },
        }
    }

    fn voice_deps(&self) -> VoiceDeps {
        let backend: Arc<dyn VoiceBackend> = Arc::new(self.inner.link.clone());
        VoiceDeps {
            platform: Arc::clone(&self.inner.platform),
            transcoder: Arc::clone(&self.inner.transcoder),
            backend,
            registry: Arc::clone(&self.inner.registry),
            notices: self.inner.notices_tx.clone(),
        }
    }
}
