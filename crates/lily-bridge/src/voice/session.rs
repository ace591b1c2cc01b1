//! The voice session task and its handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lily_common::{AudioFrame, BridgeError, PlatformError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::VoiceBackend;
use super::queue::FrameQueue;
use super::types::{LeaveReason, VoiceNotice, VoiceSettings, VoiceState, VoiceStats};
use crate::platform::{PlatformClient, VoiceConnection, VoiceJoinRequest};
use crate::registry::SessionRegistry;
use crate::transcoder::{Transcoder, TranscoderControl, TranscoderHandle, TranscoderStreams};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub(crate) enum VoiceCommand {
    Leave(LeaveReason),
}

#[derive(Default)]
struct Counters {
    captured: AtomicU64,
    sent: AtomicU64,
    received: AtomicU64,
    played: AtomicU64,
    send_failures: AtomicU64,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Registry-side view of a running session. Cheap to clone.
#[derive(Clone)]
pub struct VoiceSessionHandle {
    session_id: u64,
    guild_id: String,
    channel_id: String,
    requested_by: String,
    reply_channel_id: Option<String>,
    state: watch::Receiver<VoiceState>,
    commands: mpsc::Sender<VoiceCommand>,
    uplink: Arc<FrameQueue>,
    downlink: Arc<FrameQueue>,
    counters: Arc<Counters>,
}

impl VoiceSessionHandle {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn requested_by(&self) -> &str {
        &self.requested_by
    }

    pub fn reply_channel_id(&self) -> Option<&str> {
        self.reply_channel_id.as_deref()
    }

    pub fn state(&self) -> VoiceState {
        *self.state.borrow()
    }

    /// The session task is gone (or was never started).
    pub fn is_finished(&self) -> bool {
        self.commands.is_closed()
    }

    /// Wait for the session task to end.
    pub async fn finished(&self) {
        self.commands.closed().await;
    }

    /// Ask the session to leave. Returns false if it is already on its way
    /// out.
    pub fn request_leave(&self, reason: LeaveReason) -> bool {
        self.commands.try_send(VoiceCommand::Leave(reason)).is_ok()
    }

    /// Queue backend audio for playback. Dropped unless the session is
    /// active.
    pub fn deliver_frame(&self, frame: AudioFrame) -> bool {
        if self.state() != VoiceState::Active {
            return false;
        }
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        self.downlink.push(frame)
    }

    pub fn stats(&self) -> VoiceStats {
        VoiceStats {
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
            state: self.state(),
            frames_captured: self.counters.captured.load(Ordering::Relaxed),
            frames_sent: self.counters.sent.load(Ordering::Relaxed),
            frames_received: self.counters.received.load(Ordering::Relaxed),
            frames_played: self.counters.played.load(Ordering::Relaxed),
            uplink_dropped: self.uplink.dropped(),
            downlink_dropped: self.downlink.dropped(),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Everything a running session talks to.
#[derive(Clone)]
pub struct VoiceDeps {
    pub platform: Arc<dyn PlatformClient>,
    pub transcoder: Arc<dyn Transcoder>,
    pub backend: Arc<dyn VoiceBackend>,
    pub registry: Arc<SessionRegistry>,
    pub notices: mpsc::UnboundedSender<VoiceNotice>,
}

pub struct VoiceSession {
    session_id: u64,
    request: VoiceJoinRequest,
    settings: VoiceSettings,
    state_tx: watch::Sender<VoiceState>,
    commands: mpsc::Receiver<VoiceCommand>,
    uplink: Arc<FrameQueue>,
    downlink: Arc<FrameQueue>,
    counters: Arc<Counters>,
}

struct Joined {
    connection: VoiceConnection,
    transcoder: TranscoderHandle,
}

enum Outcome {
    Leave(LeaveReason),
    Failed(String),
}

impl VoiceSession {
    /// Create a session in `Joining`. Nothing is started until [`run`].
    ///
    /// [`run`]: VoiceSession::run
    pub fn new(request: VoiceJoinRequest, settings: VoiceSettings) -> (Self, VoiceSessionHandle) {
        let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let (state_tx, state_rx) = watch::channel(VoiceState::Joining);
        let (commands_tx, commands_rx) = mpsc::channel(4);
        let uplink = Arc::new(FrameQueue::new(settings.queue_capacity));
        let downlink = Arc::new(FrameQueue::new(settings.queue_capacity));
        let counters = Arc::new(Counters::default());

        let handle = VoiceSessionHandle {
            session_id,
            guild_id: request.guild_id.clone(),
            channel_id: request.channel_id.clone(),
            requested_by: request.user_id.clone(),
            reply_channel_id: request.reply_channel_id.clone(),
            state: state_rx,
            commands: commands_tx,
            uplink: Arc::clone(&uplink),
            downlink: Arc::clone(&downlink),
            counters: Arc::clone(&counters),
        };
        let session = Self {
            session_id,
            request,
            settings,
            state_tx,
            commands: commands_rx,
            uplink,
            downlink,
            counters,
        };
        (session, handle)
    }

    /// Drive the session from join to cleanup. Removes its own registry
    /// entry before returning.
    pub async fn run(mut self, deps: VoiceDeps) {
        let guild_id = self.request.guild_id.clone();
        info!(
            guild_id = %guild_id,
            channel_id = %self.request.channel_id,
            session_id = self.session_id,
            "voice session joining"
        );

        let joined = tokio::select! {
            joined = join_all(&self.request, &self.settings, &deps) => joined.map_err(Outcome::from),
            command = self.commands.recv() => Err(Outcome::Leave(leave_reason(command))),
        };

        let (outcome, control, pumps) = match joined {
            Ok(joined) => {
                self.state_tx.send_replace(VoiceState::Active);
                info!(guild_id = %guild_id, session_id = self.session_id, "voice session active");
                let _ = deps.notices.send(VoiceNotice::Joined {
                    guild_id: guild_id.clone(),
                    channel_id: self.request.channel_id.clone(),
                    reply_channel_id: self.request.reply_channel_id.clone(),
                });
                self.active(joined, &deps).await
            }
            Err(outcome) => (outcome, None, Vec::new()),
        };

        self.cleanup(outcome, control, pumps, &deps).await;
    }

    /// Pump audio until told to leave or something breaks.
    async fn active(
        &mut self,
        joined: Joined,
        deps: &VoiceDeps,
    ) -> (Outcome, Option<TranscoderControl>, Vec<JoinHandle<()>>) {
        let Joined {
            connection,
            transcoder,
        } = joined;
        let TranscoderHandle {
            streams,
            mut control,
        } = transcoder;
        let (fail_tx, mut fail_rx) = mpsc::channel::<String>(4);
        let pumps = self.spawn_pumps(connection, streams, fail_tx, deps);

        let outcome = tokio::select! {
            command = self.commands.recv() => Outcome::Leave(leave_reason(command)),
            exit = control.exited() => Outcome::Failed(match exit {
                Ok(()) => "transcoder stopped unexpectedly".to_string(),
                Err(e) => e.to_string(),
            }),
            Some(reason) = fail_rx.recv() => Outcome::Failed(reason),
        };
        (outcome, Some(control), pumps)
    }

    fn spawn_pumps(
        &self,
        connection: VoiceConnection,
        streams: TranscoderStreams,
        fail_tx: mpsc::Sender<String>,
        deps: &VoiceDeps,
    ) -> Vec<JoinHandle<()>> {
        let VoiceConnection {
            mut capture,
            playback,
        } = connection;
        let TranscoderStreams {
            encode_tx,
            mut encoded_rx,
            decode_tx,
            mut decoded_rx,
        } = streams;
        let guild_id = self.request.guild_id.clone();

        // platform capture -> uplink queue
        let capture_pump = {
            let uplink = Arc::clone(&self.uplink);
            let counters = Arc::clone(&self.counters);
            let fail_tx = fail_tx.clone();
            tokio::spawn(async move {
                while let Some(frame) = capture.recv().await {
                    counters.captured.fetch_add(1, Ordering::Relaxed);
                    if !uplink.push(frame) {
                        return;
                    }
                }
                let _ = fail_tx.send("platform voice connection lost".into()).await;
            })
        };

        // uplink queue -> encoder
        let encode_pump = {
            let uplink = Arc::clone(&self.uplink);
            tokio::spawn(async move {
                while let Some(frame) = uplink.pop().await {
                    if encode_tx.send(frame.data).await.is_err() {
                        break;
                    }
                }
            })
        };

        // encoder -> backend
        let send_pump = {
            let backend = Arc::clone(&deps.backend);
            let counters = Arc::clone(&self.counters);
            let guild_id = guild_id.clone();
            tokio::spawn(async move {
                let mut seq = 0u64;
                while let Some(bytes) = encoded_rx.recv().await {
                    let frame = AudioFrame::new(seq, bytes);
                    seq += 1;
                    match backend.send_frame(&guild_id, &frame) {
                        Ok(()) => {
                            counters.sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            let failures = counters.send_failures.fetch_add(1, Ordering::Relaxed);
                            if failures % 100 == 0 {
                                debug!(guild_id = %guild_id, error = %e, failures, "dropping uplink audio");
                            }
                        }
                    }
                }
            })
        };

        // downlink queue -> decoder
        let decode_pump = {
            let downlink = Arc::clone(&self.downlink);
            tokio::spawn(async move {
                while let Some(frame) = downlink.pop().await {
                    if decode_tx.send(frame.data).await.is_err() {
                        break;
                    }
                }
            })
        };

        // decoder -> platform playback
        let playback_pump = {
            let counters = Arc::clone(&self.counters);
            tokio::spawn(async move {
                let mut seq = 0u64;
                while let Some(bytes) = decoded_rx.recv().await {
                    if playback.send(AudioFrame::new(seq, bytes)).await.is_err() {
                        let _ = fail_tx.send("platform playback closed".into()).await;
                        return;
                    }
                    seq += 1;
                    counters.played.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        vec![
            capture_pump,
            encode_pump,
            send_pump,
            decode_pump,
            playback_pump,
        ]
    }

    async fn cleanup(
        self,
        outcome: Outcome,
        control: Option<TranscoderControl>,
        pumps: Vec<JoinHandle<()>>,
        deps: &VoiceDeps,
    ) {
        let guild_id = self.request.guild_id.as_str();
        let backend_closed = matches!(outcome, Outcome::Leave(LeaveReason::BackendClosed(_)));
        match &outcome {
            Outcome::Leave(reason) => {
                info!(guild_id, session_id = self.session_id, reason = ?reason, "voice session leaving");
                self.state_tx.send_replace(VoiceState::Leaving);
            }
            Outcome::Failed(error) => {
                warn!(guild_id, session_id = self.session_id, error = %error, "voice session failed");
                self.state_tx.send_replace(VoiceState::Error);
            }
        }

        for pump in &pumps {
            pump.abort();
        }
        self.uplink.close();
        self.downlink.close();

        match tokio::time::timeout(
            self.settings.leave_timeout,
            deps.platform.leave_voice(guild_id),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(guild_id, error = %e, "platform failed to leave voice channel"),
            Err(_) => warn!(guild_id, "platform did not leave voice channel in time"),
        }

        if !backend_closed {
            if let Err(e) = deps.backend.leave(guild_id) {
                debug!(guild_id, error = %e, "could not tell backend about voice leave");
            }
        }

        if let Some(control) = control {
            if let Err(e) = control.stop(self.settings.stop_timeout).await {
                warn!(guild_id, error = %e, "transcoder did not stop cleanly");
            }
        }

        let notice = match outcome {
            Outcome::Leave(reason) => {
                self.state_tx.send_replace(VoiceState::Idle);
                VoiceNotice::Ended {
                    guild_id: guild_id.to_string(),
                    reply_channel_id: self.request.reply_channel_id.clone(),
                    reason,
                }
            }
            Outcome::Failed(error) => VoiceNotice::Failed {
                guild_id: guild_id.to_string(),
                reply_channel_id: self.request.reply_channel_id.clone(),
                user_id: self.request.user_id.clone(),
                error,
            },
        };

        deps.registry
            .remove_voice_session(guild_id, self.session_id)
            .await;
        let final_state = *self.state_tx.borrow();
        info!(guild_id, session_id = self.session_id, state = %final_state, "voice session finished");
        let _ = deps.notices.send(notice);
    }
}

impl From<BridgeError> for Outcome {
    fn from(err: BridgeError) -> Self {
        Outcome::Failed(err.to_string())
    }
}

fn leave_reason(command: Option<VoiceCommand>) -> LeaveReason {
    match command {
        Some(VoiceCommand::Leave(reason)) => reason,
        // Every handle is gone; nobody can observe the session any more.
        None => LeaveReason::Shutdown,
    }
}

/// Backend ack, platform join and transcoder start, concurrently and under
/// one deadline. Whatever did come up is released by the caller's cleanup.
async fn join_all(
    request: &VoiceJoinRequest,
    settings: &VoiceSettings,
    deps: &VoiceDeps,
) -> Result<Joined, BridgeError> {
    let guild_id = request.guild_id.as_str();
    let channel_id = request.channel_id.as_str();
    let work = async {
        let (backend, platform, transcoder) = tokio::join!(
            deps.backend.join(request, settings.join_timeout),
            deps.platform.join_voice(guild_id, channel_id),
            deps.transcoder.start(guild_id, channel_id),
        );
        backend?;
        let transcoder = transcoder?;
        let connection = platform?;
        Ok(Joined {
            connection,
            transcoder,
        })
    };
    match tokio::time::timeout(settings.join_timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(PlatformError::Timeout("voice join".into()).into()),
    }
}
