//! Audio transcoding between the platform codec and the backend codec.
//!
//! A transcoder is two byte-stream transforms running side by side: encode
//! (platform audio in, backend audio out) and decode (the reverse). The
//! session talks to them over channels; how the bytes are transformed is
//! up to the implementation.

mod process;

pub use process::ProcessTranscoder;
pub(crate) use process::{log_stderr, read_frames, settle};

use std::time::Duration;

use async_trait::async_trait;
use lily_common::TranscoderError;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Start a transcoder for one voice session.
    async fn start(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<TranscoderHandle, TranscoderError>;
}

// ---------------------------------------------------------------------------
// Session side
// ---------------------------------------------------------------------------

/// What a voice session holds for a running transcoder.
pub struct TranscoderHandle {
    pub streams: TranscoderStreams,
    pub control: TranscoderControl,
}

/// Byte streams in and out of the transcoder.
pub struct TranscoderStreams {
    pub encode_tx: mpsc::Sender<Vec<u8>>,
    pub encoded_rx: mpsc::Receiver<Vec<u8>>,
    pub decode_tx: mpsc::Sender<Vec<u8>>,
    pub decoded_rx: mpsc::Receiver<Vec<u8>>,
}

/// Stop the transcoder and learn how it ended.
pub struct TranscoderControl {
    stop_tx: Option<oneshot::Sender<()>>,
    exit_rx: Option<oneshot::Receiver<Result<(), TranscoderError>>>,
}

impl TranscoderControl {
    /// Resolves when the transcoder stops on its own. Never resolves twice.
    pub async fn exited(&mut self) -> Result<(), TranscoderError> {
        match self.exit_rx.as_mut() {
            Some(rx) => {
                let result = rx.await.unwrap_or_else(|_| {
                    Err(TranscoderError::Exited("supervisor went away".into()))
                });
                self.exit_rx = None;
                result
            }
            None => std::future::pending().await,
        }
    }

    /// Ask the transcoder to stop and wait up to `bound` for it to finish.
    pub async fn stop(mut self, bound: Duration) -> Result<(), TranscoderError> {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        let Some(rx) = self.exit_rx.take() else {
            return Ok(());
        };
        match tokio::time::timeout(bound, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Ok(()),
            Err(_) => {
                warn!("transcoder did not report exit in time");
                Err(TranscoderError::Exited("stop timed out".into()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker side
// ---------------------------------------------------------------------------

/// The transcoder's ends of the session channels.
pub struct TranscoderWorker {
    pub encode_rx: mpsc::Receiver<Vec<u8>>,
    pub encoded_tx: mpsc::Sender<Vec<u8>>,
    pub decode_rx: mpsc::Receiver<Vec<u8>>,
    pub decoded_tx: mpsc::Sender<Vec<u8>>,
    pub stop_rx: oneshot::Receiver<()>,
    pub exit_tx: oneshot::Sender<Result<(), TranscoderError>>,
}

/// Wire a session handle to a worker with `capacity` chunks per stream.
pub fn transcoder_channel(capacity: usize) -> (TranscoderHandle, TranscoderWorker) {
    let capacity = capacity.max(1);
    let (encode_tx, encode_rx) = mpsc::channel(capacity);
    let (encoded_tx, encoded_rx) = mpsc::channel(capacity);
    let (decode_tx, decode_rx) = mpsc::channel(capacity);
    let (decoded_tx, decoded_rx) = mpsc::channel(capacity);
    let (stop_tx, stop_rx) = oneshot::channel();
    let (exit_tx, exit_rx) = oneshot::channel();

    let handle = TranscoderHandle {
        streams: TranscoderStreams {
            encode_tx,
            encoded_rx,
            decode_tx,
            decoded_rx,
        },
        control: TranscoderControl {
            stop_tx: Some(stop_tx),
            exit_rx: Some(exit_rx),
        },
    };
    let worker = TranscoderWorker {
        encode_rx,
        encoded_tx,
        decode_rx,
        decoded_tx,
        stop_rx,
        exit_tx,
    };
    (handle, worker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_reports_worker_result() {
        let (handle, worker) = transcoder_channel(4);
        tokio::spawn(async move {
            let _ = worker.stop_rx.await;
            let _ = worker.exit_tx.send(Ok(()));
        });
        assert!(handle.control.stop(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn exited_fires_on_unexpected_exit() {
        let (mut handle, worker) = transcoder_channel(4);
        let _ = worker
            .exit_tx
            .send(Err(TranscoderError::Exited("signal 9".into())));
        let err = handle.control.exited().await.unwrap_err();
        assert_eq!(err, TranscoderError::Exited("signal 9".into()));
        // Already reported; stopping afterwards is a no-op.
        assert!(handle.control.stop(Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn dropped_worker_counts_as_exit() {
        let (mut handle, worker) = transcoder_channel(4);
        drop(worker);
        assert!(handle.control.exited().await.is_err());
    }
}
