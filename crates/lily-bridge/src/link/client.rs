//! Public handle for the backend link.

use std::sync::Arc;
use std::time::Duration;

use lily_common::{LinkError, RequestId};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use super::connection::{connection_loop, LinkShared, Queued};
use super::pending::PendingRequests;
use super::resolver::EndpointResolver;
use super::types::{LinkConfig, LinkEvent, LinkState, LinkStats};
use crate::protocol::Envelope;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Handle to the backend connection task. Cheap to clone.
///
/// Sending never blocks on the network: frames go into a bounded queue
/// drained by the connection task, and every call fails fast with
/// [`LinkError::LinkDown`] while the link is not connected.
#[derive(Clone)]
pub struct BackendLink {
    outbound_tx: mpsc::Sender<Queued>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shared: Arc<LinkShared>,
    request_timeout: Duration,
    heartbeat_timeout: Duration,
}

impl BackendLink {
    /// Start the background connection. Returns `(link, event_receiver)`.
    pub fn connect(
        config: LinkConfig,
        resolver: Arc<dyn EndpointResolver>,
    ) -> (Self, mpsc::Receiver<LinkEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(LinkShared::new());

        let link = Self {
            outbound_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            shared: Arc::clone(&shared),
            request_timeout: config.request_timeout,
            heartbeat_timeout: config.heartbeat_timeout,
        };

        tokio::spawn(connection_loop(
            config,
            resolver,
            shared,
            event_tx,
            outbound_rx,
            shutdown_rx,
        ));

        (link, event_rx)
    }

    /// Send a request and register a waiter for its response.
    pub async fn send(&self, envelope: Envelope) -> Result<PendingResponse, LinkError> {
        let epoch = self.ensure_connected()?;

        let id = envelope.id().clone();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id.clone(), tx).await;

        // A disconnect between the check above and the insert would miss
        // this waiter when draining. The frame is tagged with the
        // connection checked here, so a later connection never sends it.
        if self.shared.connected_epoch() != Some(epoch) {
            self.shared.pending.remove(&id).await;
            return Err(LinkError::LinkDown);
        }

        if let Err(e) = self.enqueue(epoch, envelope) {
            self.shared.pending.remove(&id).await;
            return Err(e);
        }

        Ok(PendingResponse {
            id,
            rx,
            timeout: self.request_timeout,
            pending: self.shared.pending.clone(),
        })
    }

    /// Send and wait for the response in one go.
    pub async fn request(&self, envelope: Envelope) -> Result<Envelope, LinkError> {
        self.send(envelope).await?.wait().await
    }

    /// Fire-and-forget frame. Never registers a waiter.
    pub fn send_oneway(&self, envelope: Envelope) -> Result<(), LinkError> {
        let epoch = self.ensure_connected()?;
        self.enqueue(epoch, envelope)
    }

    /// Connected and a pong arrived within the heartbeat timeout.
    pub fn is_healthy(&self) -> bool {
        self.shared.is_healthy(self.heartbeat_timeout)
    }

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.shared.subscribe_state()
    }

    pub async fn stats(&self) -> LinkStats {
        self.shared.stats().await
    }

    /// Close the connection for good. Pending waiters fail with `LinkLost`.
    pub fn shutdown(&self) {
        debug!("backend link shutdown requested");
        self.shutdown_tx.send_replace(true);
    }

    /// Wait until the connection task has fully stopped.
    pub async fn closed(&self) {
        self.outbound_tx.closed().await;
    }

    /// The current connection's epoch, or `LinkDown`.
    fn ensure_connected(&self) -> Result<u64, LinkError> {
        self.shared.connected_epoch().ok_or(LinkError::LinkDown)
    }

    #[cfg(test)]
    pub(super) fn connected_epoch(&self) -> Option<u64> {
        self.shared.connected_epoch()
    }

    pub(super) fn enqueue(&self, epoch: u64, envelope: Envelope) -> Result<(), LinkError> {
        let queued = Queued { epoch, envelope };
        self.outbound_tx.try_send(queued).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => LinkError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => LinkError::LinkDown,
        })
    }
}

// ---------------------------------------------------------------------------
// Pending response
// ---------------------------------------------------------------------------

/// A request in flight. Resolves exactly once.
pub struct PendingResponse {
    id: RequestId,
    rx: oneshot::Receiver<Result<Envelope, LinkError>>,
    timeout: Duration,
    pending: PendingRequests,
}

impl PendingResponse {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Override the request timeout for this one call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The matching response, or `Timeout` / `LinkLost`.
    pub async fn wait(self) -> Result<Envelope, LinkError> {
        match tokio::time::timeout(self.timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LinkError::LinkLost),
            Err(_elapsed) => {
                self.pending.remove(&self.id).await;
                Err(LinkError::Timeout)
            }
        }
    }
}
