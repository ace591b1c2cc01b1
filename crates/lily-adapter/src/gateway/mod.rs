//! Platform gateway: the adapter side of the platform client process.
//!
//! The client that talks to the chat platform connects here over a local
//! WebSocket, pushes decoded events in and receives commands back. One
//! client is served at a time; a new connection replaces the old one.
//!
//! Voice joins and leaves are request/acknowledge exchanges keyed by a
//! request id. Captured audio for a joined guild is routed into the
//! capture channel handed out by `join_voice`; that channel closes when
//! the client reports the voice connection gone or disconnects.

mod protocol;
mod server;

#[cfg(test)]
mod tests;

pub use server::serve;

use protocol::{Inbound, Outbound};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use lily_bridge::platform::{PlatformClient, PlatformEvent, VoiceConnection};
use lily_common::{new_id, AudioFrame, PlatformError};
use lily_config::schema::{PlatformConfig, VoiceConfig};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_QUEUE: usize = 256;
const OUTBOUND_QUEUE: usize = 256;

type AckResult = Result<(), String>;

/// Cheap to clone; all clones share the same client slot.
#[derive(Clone)]
pub struct PlatformGateway {
    inner: Arc<Inner>,
}

struct Inner {
    events_tx: mpsc::Sender<PlatformEvent>,
    state: Mutex<State>,
    next_client_id: AtomicU64,
    ack_timeout: Duration,
    frame_capacity: usize,
}

#[derive(Default)]
struct State {
    client: Option<Client>,
    pending: HashMap<String, PendingAck>,
    voice: HashMap<String, VoiceStream>,
}

struct Client {
    id: u64,
    out_tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

struct PendingAck {
    client_id: u64,
    tx: oneshot::Sender<AckResult>,
}

struct VoiceStream {
    client_id: u64,
    request_id: String,
    capture_tx: mpsc::Sender<AudioFrame>,
    next_seq: u64,
}

impl State {
    /// Drop everything owned by a client that is gone. Pending acks fail
    /// and capture channels close.
    fn forget_client(&mut self, client_id: u64) {
        self.pending.retain(|_, ack| ack.client_id != client_id);
        self.voice.retain(|guild_id, stream| {
            let keep = stream.client_id != client_id;
            if !keep {
                debug!(guild_id = %guild_id, "closing capture stream");
            }
            keep
        });
    }

    fn current(&self) -> Result<(u64, mpsc::Sender<Outbound>), PlatformError> {
        self.client
            .as_ref()
            .map(|c| (c.id, c.out_tx.clone()))
            .ok_or(PlatformError::NotConnected)
    }
}

impl PlatformGateway {
    /// Returns `(gateway, event_receiver)`. The receiver feeds the bridge.
    pub fn new(ack_timeout: Duration, frame_capacity: usize) -> (Self, mpsc::Receiver<PlatformEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let gateway = Self {
            inner: Arc::new(Inner {
                events_tx,
                state: Mutex::new(State::default()),
                next_client_id: AtomicU64::new(1),
                ack_timeout,
                frame_capacity: frame_capacity.max(1),
            }),
        };
        (gateway, events_rx)
    }

    pub fn from_config(
        platform: &PlatformConfig,
        voice: &VoiceConfig,
    ) -> (Self, mpsc::Receiver<PlatformEvent>) {
        Self::new(platform.ack_timeout(), voice.frame_queue_capacity)
    }

    pub fn is_connected(&self) -> bool {
        self.state().client.is_some()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // -- client lifecycle ---------------------------------------------------

    /// Make a freshly accepted connection the current client.
    fn attach(&self, cancel: CancellationToken) -> (u64, mpsc::Receiver<Outbound>) {
        let id = self.inner.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let mut state = self.state();
        if let Some(old) = state.client.replace(Client { id, out_tx, cancel }) {
            info!(old = old.id, new = id, "platform client replaced");
            old.cancel.cancel();
            state.forget_client(old.id);
        }
        (id, out_rx)
    }

    fn detach(&self, client_id: u64) {
        let mut state = self.state();
        if state.client.as_ref().is_some_and(|c| c.id == client_id) {
            state.client = None;
        }
        state.forget_client(client_id);
    }

    fn is_current(&self, client_id: u64) -> bool {
        self.state()
            .client
            .as_ref()
            .is_some_and(|c| c.id == client_id)
    }

    // -- inbound ------------------------------------------------------------

    async fn on_inbound(&self, client_id: u64, msg: Inbound) {
        if !self.is_current(client_id) {
            debug!(client_id, "message from replaced client dropped");
            return;
        }
        match msg {
            Inbound::TextMessage(msg) => self.forward(PlatformEvent::TextMessage(msg)).await,
            Inbound::VoiceJoinRequest(req) => {
                self.forward(PlatformEvent::VoiceJoinRequest(req)).await
            }
            Inbound::VoiceLeaveRequest(req) => {
                self.forward(PlatformEvent::VoiceLeaveRequest(req)).await
            }
            Inbound::MusicCommand(req) => self.forward(PlatformEvent::Music(req)).await,
            Inbound::VoiceReady { request_id } | Inbound::LeaveAck { request_id } => {
                self.resolve_ack(&request_id, Ok(()))
            }
            Inbound::VoiceFailed {
                request_id,
                message,
            } => self.resolve_ack(&request_id, Err(message)),
            Inbound::VoiceFrame { guild_id, data } => self.on_voice_frame(&guild_id, data),
            Inbound::VoiceClosed { guild_id } => {
                let removed = {
                    let mut state = self.state();
                    match state.voice.get(&guild_id) {
                        Some(stream) if stream.client_id == client_id => {
                            state.voice.remove(&guild_id)
                        }
                        _ => None,
                    }
                };
                if removed.is_some() {
                    info!(guild_id = %guild_id, "platform closed the voice connection");
                }
            }
        }
    }

    async fn forward(&self, event: PlatformEvent) {
        if self.inner.events_tx.send(event).await.is_err() {
            debug!("bridge stopped, dropping platform event");
        }
    }

    fn resolve_ack(&self, request_id: &str, result: AckResult) {
        let pending = self.state().pending.remove(request_id);
        match pending {
            Some(ack) => {
                let _ = ack.tx.send(result);
            }
            None => debug!(request_id, "acknowledgement for unknown request"),
        }
    }

    fn on_voice_frame(&self, guild_id: &str, data: String) {
        let (seq, capture_tx) = {
            let mut state = self.state();
            let Some(stream) = state.voice.get_mut(guild_id) else {
                debug!(guild_id, "audio for guild without a voice stream");
                return;
            };
            let seq = stream.next_seq;
            stream.next_seq += 1;
            (seq, stream.capture_tx.clone())
        };
        let frame = match protocol::decode_frame(guild_id, seq, data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(guild_id, error = %e, "unreadable voice frame");
                return;
            }
        };
        match capture_tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(guild_id, seq, "capture backlog full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(guild_id, "voice session gone, dropping frame");
            }
        }
    }

    // -- outbound -----------------------------------------------------------

    /// Send a command and wait for the client to acknowledge it.
    async fn request_ack(
        &self,
        request_id: &str,
        out_tx: &mpsc::Sender<Outbound>,
        command: Outbound,
        ack_rx: oneshot::Receiver<AckResult>,
        what: &str,
    ) -> Result<(), PlatformError> {
        if out_tx.send(command).await.is_err() {
            self.state().pending.remove(request_id);
            return Err(PlatformError::NotConnected);
        }
        match tokio::time::timeout(self.inner.ack_timeout, ack_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(PlatformError::Rejected(message)),
            Ok(Err(_)) => Err(PlatformError::NotConnected),
            Err(_) => {
                self.state().pending.remove(request_id);
                Err(PlatformError::Timeout(what.to_string()))
            }
        }
    }
}

#[async_trait]
impl PlatformClient for PlatformGateway {
    async fn send_text(&self, channel_id: &str, text: &str) -> Result<(), PlatformError> {
        let (_, out_tx) = self.state().current()?;
        out_tx
            .send(Outbound::SendText {
                channel_id: channel_id.to_string(),
                text: text.to_string(),
            })
            .await
            .map_err(|_| PlatformError::NotConnected)
    }

    async fn join_voice(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<VoiceConnection, PlatformError> {
        let request_id = new_id();
        let (capture_tx, capture_rx) = mpsc::channel(self.inner.frame_capacity);
        let (playback_tx, playback_rx) = mpsc::channel(self.inner.frame_capacity);
        let (ack_tx, ack_rx) = oneshot::channel();

        let out_tx = {
            let mut state = self.state();
            let (client_id, out_tx) = state.current()?;
            state.pending.insert(
                request_id.clone(),
                PendingAck {
                    client_id,
                    tx: ack_tx,
                },
            );
            // Registered before the ack so early frames are not lost.
            state.voice.insert(
                guild_id.to_string(),
                VoiceStream {
                    client_id,
                    request_id: request_id.clone(),
                    capture_tx,
                    next_seq: 0,
                },
            );
            out_tx
        };

        let command = Outbound::JoinVoice {
            request_id: request_id.clone(),
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
        };
        if let Err(e) = self
            .request_ack(&request_id, &out_tx, command, ack_rx, "voice join")
            .await
        {
            let mut state = self.state();
            if state
                .voice
                .get(guild_id)
                .is_some_and(|s| s.request_id == request_id)
            {
                state.voice.remove(guild_id);
            }
            return Err(e);
        }

        tokio::spawn(forward_playback(guild_id.to_string(), playback_rx, out_tx));
        info!(guild_id, channel_id, "platform joined voice channel");
        Ok(VoiceConnection {
            capture: capture_rx,
            playback: playback_tx,
        })
    }

    async fn leave_voice(&self, guild_id: &str) -> Result<(), PlatformError> {
        let request_id = new_id();
        let (ack_tx, ack_rx) = oneshot::channel();
        let out_tx = {
            let mut state = self.state();
            state.voice.remove(guild_id);
            let (client_id, out_tx) = state.current()?;
            state.pending.insert(
                request_id.clone(),
                PendingAck {
                    client_id,
                    tx: ack_tx,
                },
            );
            out_tx
        };

        let command = Outbound::LeaveVoice {
            request_id: request_id.clone(),
            guild_id: guild_id.to_string(),
        };
        self.request_ack(&request_id, &out_tx, command, ack_rx, "voice leave")
            .await?;
        info!(guild_id, "platform left voice channel");
        Ok(())
    }
}

/// Relay synthesized audio to the client until the session drops its
/// sender or the client goes away.
async fn forward_playback(
    guild_id: String,
    mut playback: mpsc::Receiver<AudioFrame>,
    out_tx: mpsc::Sender<Outbound>,
) {
    while let Some(frame) = playback.recv().await {
        if out_tx
            .send(Outbound::play_frame(&guild_id, &frame))
            .await
            .is_err()
        {
            debug!(guild_id = %guild_id, "platform client gone, playback stopped");
            return;
        }
    }
}
