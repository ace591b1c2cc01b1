//! Requests waiting for their response, keyed by envelope id.

use std::collections::HashMap;
use std::sync::Arc;

use lily_common::{LinkError, RequestId};
use tokio::sync::{oneshot, Mutex};

use crate::protocol::Envelope;

pub(crate) type Waiter = oneshot::Sender<Result<Envelope, LinkError>>;

#[derive(Clone, Default)]
pub(crate) struct PendingRequests {
    inner: Arc<Mutex<HashMap<RequestId, Waiter>>>,
}

impl PendingRequests {
    pub(crate) async fn insert(&self, id: RequestId, waiter: Waiter) {
        self.inner.lock().await.insert(id, waiter);
    }

    pub(crate) async fn remove(&self, id: &RequestId) -> bool {
        self.inner.lock().await.remove(id).is_some()
    }

    /// Hand `envelope` to its waiter. Gives the envelope back when nobody
    /// is waiting for this id.
    pub(crate) async fn complete(&self, envelope: Envelope) -> Result<(), Envelope> {
        let waiter = self.inner.lock().await.remove(envelope.id());
        match waiter {
            Some(waiter) => {
                // The caller may have given up already; that is fine.
                let _ = waiter.send(Ok(envelope));
                Ok(())
            }
            None => Err(envelope),
        }
    }

    /// Fail every waiter with `error`. Returns how many were failed.
    pub(crate) async fn fail_all(&self, error: LinkError) -> usize {
        let drained: Vec<Waiter> = {
            let mut map = self.inner.lock().await;
            map.drain().map(|(_, waiter)| waiter).collect()
        };
        let count = drained.len();
        for waiter in drained {
            let _ = waiter.send(Err(error.clone()));
        }
        count
    }

    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
