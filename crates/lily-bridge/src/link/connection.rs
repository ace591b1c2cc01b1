//! Background connection task: connect, run one session, reconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lily_common::LinkError;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::pending::PendingRequests;
use super::resolver::EndpointResolver;
use super::types::{LinkConfig, LinkEvent, LinkState, LinkStats};
use crate::protocol::{Envelope, EnvelopeKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A frame waiting for the connection task, tagged with the connection it
/// was queued for.
pub(crate) struct Queued {
    pub(crate) epoch: u64,
    pub(crate) envelope: Envelope,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Liveness {
    connected_at: Option<Instant>,
    connected_since: Option<chrono::DateTime<chrono::Utc>>,
    last_pong: Option<Instant>,
}

/// State the connection task writes and the [`BackendLink`](super::BackendLink)
/// handle reads.
pub(crate) struct LinkShared {
    state: watch::Sender<LinkState>,
    liveness: Mutex<Liveness>,
    pub(crate) pending: PendingRequests,
    /// Bumped on every successful connect.
    epoch: AtomicU64,
    unmatched_responses: AtomicU64,
    reconnects: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
}

impl LinkShared {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            state,
            liveness: Mutex::new(Liveness::default()),
            pending: PendingRequests::default(),
            epoch: AtomicU64::new(0),
            unmatched_responses: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// The current connection, or `None` while not connected.
    pub(crate) fn connected_epoch(&self) -> Option<u64> {
        (self.state() == LinkState::Connected).then(|| self.epoch.load(Ordering::SeqCst))
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }

    fn liveness(&self) -> MutexGuard<'_, Liveness> {
        self.liveness.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_connected(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut live = self.liveness();
            live.connected_at = Some(Instant::now());
            live.connected_since = Some(chrono::Utc::now());
            live.last_pong = None;
        }
        self.set_state(LinkState::Connected);
        epoch
    }

    fn mark_disconnected(&self, state: LinkState) {
        {
            let mut live = self.liveness();
            live.connected_at = None;
            live.connected_since = None;
        }
        self.set_state(state);
    }

    fn record_pong(&self) {
        self.liveness().last_pong = Some(Instant::now());
    }

    /// No pong within `timeout`, counting from connect when none arrived yet.
    fn pong_overdue(&self, timeout: Duration) -> bool {
        let live = self.liveness();
        match live.last_pong.or(live.connected_at) {
            Some(since) => since.elapsed() > timeout,
            None => true,
        }
    }

    pub(crate) fn is_healthy(&self, timeout: Duration) -> bool {
        if self.state() != LinkState::Connected {
            return false;
        }
        self.liveness()
            .last_pong
            .is_some_and(|pong| pong.elapsed() <= timeout)
    }

    pub(crate) fn count_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) async fn stats(&self) -> LinkStats {
        let connected_since = self.liveness().connected_since;
        LinkStats {
            state: Some(self.state()),
            pending_requests: self.pending.len().await,
            unmatched_responses: self.unmatched_responses.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            connected_since,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

/// Why a connected session ended.
enum SessionEnd {
    Shutdown,
    Lost(String),
}

/// Background task managing the WebSocket connection with auto-reconnect.
pub(crate) async fn connection_loop(
    config: LinkConfig,
    resolver: Arc<dyn EndpointResolver>,
    shared: Arc<LinkShared>,
    event_tx: mpsc::Sender<LinkEvent>,
    mut outbound_rx: mpsc::Receiver<Queued>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(
        config.reconnect_base,
        config.reconnect_max,
        config.reconnect_jitter,
    );
    let mut failures: u32 = 0;
    let mut ever_connected = false;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        shared.set_state(LinkState::Connecting);

        match connect(&config, resolver.as_ref(), &mut shutdown_rx).await {
            Ok(Some(ws)) => {
                backoff.reset();
                failures = 0;
                if ever_connected {
                    shared.reconnects.fetch_add(1, Ordering::Relaxed);
                }
                ever_connected = true;
                let epoch = shared.mark_connected();
                info!("backend link connected");
                let _ = event_tx.send(LinkEvent::Connected).await;

                let end = run_session(
                    ws,
                    epoch,
                    &config,
                    &shared,
                    &event_tx,
                    &mut outbound_rx,
                    &mut shutdown_rx,
                )
                .await;

                let (state, reason) = match &end {
                    SessionEnd::Shutdown => (LinkState::Draining, "shutdown".to_string()),
                    SessionEnd::Lost(reason) => (LinkState::Disconnected, reason.clone()),
                };
                shared.mark_disconnected(state);
                let failed = shared.pending.fail_all(LinkError::LinkLost).await;
                discard_queued(&mut outbound_rx);
                warn!(reason = %reason, failed_requests = failed, "backend link disconnected");
                let _ = event_tx.send(LinkEvent::Disconnected { reason }).await;

                if matches!(end, SessionEnd::Shutdown) {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                failures += 1;
                shared.set_state(LinkState::Disconnected);
                error!(error = %e, attempt = failures, "failed to connect to backend");
            }
        }

        if let Some(max) = config.max_reconnect_attempts {
            if failures >= max {
                error!(attempts = failures, "giving up on backend link");
                shared.set_state(LinkState::Disconnected);
                let _ = event_tx.send(LinkEvent::Fatal { attempts: failures }).await;
                return;
            }
        }

        let delay = backoff.next_delay();
        info!(delay_ms = delay.as_millis() as u64, "reconnecting to backend");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    shared.mark_disconnected(LinkState::Draining);
    shared.pending.fail_all(LinkError::LinkLost).await;
    discard_queued(&mut outbound_rx);
    debug!("backend connection task exited");
}

/// Resolve and connect. `Ok(None)` means shutdown was requested meanwhile.
async fn connect(
    config: &LinkConfig,
    resolver: &dyn EndpointResolver,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<Option<WsStream>, LinkError> {
    let attempt = async {
        let url = resolver.resolve().await?;
        info!(url = %url, "connecting to backend");
        match tokio::time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        {
            Ok(Ok((ws, _))) => Ok(ws),
            Ok(Err(e)) => Err(LinkError::Protocol(format!("connect failed: {e}"))),
            Err(_elapsed) => Err(LinkError::Timeout),
        }
    };

    tokio::select! {
        result = attempt => result.map(Some),
        _ = shutdown_rx.changed() => Ok(None),
    }
}

/// Frames queued for a connection that no longer exists. Their waiters
/// have already been failed.
fn discard_queued(outbound_rx: &mut mpsc::Receiver<Queued>) {
    let mut dropped = 0usize;
    while outbound_rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!(dropped, "discarded frames queued for the lost connection");
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

async fn run_session(
    ws: WsStream,
    epoch: u64,
    config: &LinkConfig,
    shared: &LinkShared,
    event_tx: &mpsc::Sender<LinkEvent>,
    outbound_rx: &mut mpsc::Receiver<Queued>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut write, mut read) = ws.split();
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => return close_for_shutdown(&mut write, shared).await,

            incoming = read.next() => {
                let text = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .unwrap_or_else(|| "closed by backend".into());
                        return SessionEnd::Lost(reason);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return SessionEnd::Lost(format!("websocket error: {e}")),
                    None => return SessionEnd::Lost("connection closed".into()),
                };
                shared.frames_received.fetch_add(1, Ordering::Relaxed);

                let envelope = match Envelope::from_json(&text) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed backend frame");
                        continue;
                    }
                };
                match handle_incoming(envelope, shared).await {
                    Incoming::Handled => {}
                    Incoming::Reply(reply) => {
                        if let Err(e) = send_envelope(&mut write, &reply, shared).await {
                            return SessionEnd::Lost(e);
                        }
                    }
                    // A slow owner holds up reading, never shutdown.
                    Incoming::Forward(envelope) => tokio::select! {
                        sent = event_tx.send(LinkEvent::Envelope(envelope)) => {
                            if sent.is_err() {
                                debug!("link event receiver dropped");
                            }
                        }
                        _ = shutdown_rx.changed() => {
                            return close_for_shutdown(&mut write, shared).await;
                        }
                    },
                }
            }

            outbound = outbound_rx.recv() => {
                let Some(queued) = outbound else {
                    // Every handle is gone.
                    let _ = write.send(WsMessage::Close(None)).await;
                    return SessionEnd::Shutdown;
                };
                if queued.epoch != epoch {
                    debug!(id = %queued.envelope.id(), "dropping frame queued for an earlier connection");
                    continue;
                }
                let envelope = queued.envelope;
                if let Err(e) = send_envelope(&mut write, &envelope, shared).await {
                    return SessionEnd::Lost(e);
                }
            }

            _ = heartbeat.tick() => {
                if shared.pong_overdue(config.heartbeat_timeout) {
                    return SessionEnd::Lost("heartbeat timeout".into());
                }
                let ping = Envelope::new(EnvelopeKind::Ping, serde_json::json!({}));
                if let Err(e) = send_envelope(&mut write, &ping, shared).await {
                    return SessionEnd::Lost(e);
                }
            }
        }
    }
}

async fn send_envelope<S>(write: &mut S, envelope: &Envelope, shared: &LinkShared) -> Result<(), String>
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = match envelope.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, kind = ?envelope.kind(), "failed to encode envelope");
            return Ok(());
        }
    };
    write
        .send(WsMessage::Text(json.into()))
        .await
        .map_err(|e| format!("write failed: {e}"))?;
    shared.count_sent();
    Ok(())
}

async fn close_for_shutdown<S>(write: &mut S, shared: &LinkShared) -> SessionEnd
where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    shared.set_state(LinkState::Draining);
    let _ = write.send(WsMessage::Close(None)).await;
    let _ = write.close().await;
    SessionEnd::Shutdown
}

/// What to do with one backend frame after routing it.
enum Incoming {
    Handled,
    /// Send this back on the socket.
    Reply(Envelope),
    /// Hand this to the link's owner.
    Forward(Envelope),
}

async fn handle_incoming(envelope: Envelope, shared: &LinkShared) -> Incoming {
    match envelope.kind() {
        EnvelopeKind::Pong => {
            shared.record_pong();
            Incoming::Handled
        }
        EnvelopeKind::Ping => Incoming::Reply(envelope.reply(EnvelopeKind::Pong, serde_json::json!({}))),
        kind => {
            let envelope = match shared.pending.complete(envelope).await {
                Ok(()) => return Incoming::Handled,
                Err(envelope) => envelope,
            };
            if kind.is_response() {
                shared.unmatched_responses.fetch_add(1, Ordering::Relaxed);
                warn!(id = %envelope.id(), kind = ?kind, "received response for unknown request id");
                return Incoming::Handled;
            }
            Incoming::Forward(envelope)
        }
    }
}
