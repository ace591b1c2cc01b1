//! Per-guild worker tasks.
//!
//! Each key gets one task draining an unbounded queue in order. A worker
//! that sits idle closes its queue, finishes what is left and exits; the
//! next piece of work for that key starts a fresh one, which waits for the
//! old one to finish first.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};

use super::Bridge;
use crate::platform::PlatformEvent;
use crate::translator::{PlatformAction, ReplyTarget};
use crate::voice::VoiceNotice;

#[derive(Debug)]
pub(super) enum Work {
    Platform(PlatformEvent),
    Action(PlatformAction),
    Notice(VoiceNotice),
}

/// Worker key for a backend-initiated action.
pub(super) fn route_key(action: &PlatformAction) -> Option<String> {
    let target = match action {
        PlatformAction::SendText { target, .. } => Some(target),
        PlatformAction::ErrorNotice { target, .. } => target.as_ref(),
        _ => None,
    }?;
    Some(match target {
        ReplyTarget::VoiceSession(guild_id) => guild_id.clone(),
        ReplyTarget::Channel(channel_id) => format!("channel:{channel_id}"),
    })
}

pub(super) struct Workers {
    bridge: Bridge,
    idle: Duration,
    workers: HashMap<String, Worker>,
}

struct Worker {
    tx: mpsc::UnboundedSender<Work>,
    task: JoinHandle<()>,
}

impl Workers {
    pub(super) fn new(bridge: Bridge, idle: Duration) -> Self {
        Self {
            bridge,
            idle,
            workers: HashMap::new(),
        }
    }

    pub(super) fn dispatch(&mut self, key: String, work: Work) {
        let (work, previous) = match self.workers.remove(&key) {
            Some(worker) => match worker.tx.send(work) {
                Ok(()) => {
                    self.workers.insert(key, worker);
                    return;
                }
                // Worker went idle and may still be draining; the new one
                // starts after it.
                Err(mpsc::error::SendError(work)) => (work, Some(worker.task)),
            },
            None => (work, None),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        // Fresh channel with a live receiver.
        let _ = tx.send(work);
        let span = tracing::info_span!("guild", key = %key);
        let task = tokio::spawn(
            run_worker(self.bridge.clone(), rx, self.idle, previous).instrument(span),
        );
        self.workers.insert(key, Worker { tx, task });
    }

    /// Forget workers that have exited.
    pub(super) fn prune(&mut self) {
        self.workers.retain(|_, worker| !worker.task.is_finished());
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.workers.len()
    }
}

async fn run_worker(
    bridge: Bridge,
    mut rx: mpsc::UnboundedReceiver<Work>,
    idle: Duration,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }
    loop {
        match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(work)) => bridge.handle(work).await,
            Ok(None) => return,
            Err(_) => {
                rx.close();
                while let Ok(work) = rx.try_recv() {
                    bridge.handle(work).await;
                }
                debug!("worker idle, exiting");
                return;
            }
        }
    }
}
