//! Track playback through an external reader process (ffmpeg by default).

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use lily_common::MusicError;
use lily_config::schema::{MusicConfig, TranscoderCommand};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::{Track, TrackPlayer, TrackStream};
use crate::transcoder::{log_stderr, read_frames, settle};

const FRAME_BUFFER: usize = 16;

/// One process per track. `{url}` in the arguments becomes the stream url;
/// stdout is cut into `frame_bytes` frames of platform audio.
#[derive(Debug, Clone)]
pub struct ProcessPlayer {
    command: TranscoderCommand,
    frame_bytes: usize,
    grace: Duration,
}

impl ProcessPlayer {
    pub fn new(command: TranscoderCommand, frame_bytes: usize, grace: Duration) -> Self {
        Self {
            command,
            frame_bytes: frame_bytes.max(1),
            grace,
        }
    }

    pub fn from_config(config: &MusicConfig, grace: Duration) -> Self {
        Self::new(config.player.clone(), config.frame_bytes, grace)
    }
}

#[async_trait]
impl TrackPlayer for ProcessPlayer {
    async fn open(&self, track: &Track) -> Result<TrackStream, MusicError> {
        let args: Vec<String> = self
            .command
            .args
            .iter()
            .map(|arg| arg.replace("{url}", &track.stream_url))
            .collect();
        info!(program = %self.command.program, title = %track.title, "starting playback process");

        let mut child = Command::new(&self.command.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MusicError::Player(format!("{}: {e}", self.command.program)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MusicError::Player("failed to capture stdout".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr("player", stderr));
        }

        let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);
        tokio::spawn(read_frames("player", stdout, frames_tx, self.frame_bytes));

        let (stop_tx, stop_rx) = oneshot::channel();
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::select! {
                // Dropping the stream counts as a stop request.
                _ = stop_rx => settle("player", &mut child, grace).await,
                status = child.wait() => match status {
                    Ok(status) => debug!(status = %status, "playback process exited"),
                    Err(e) => debug!(error = %e, "failed to wait for playback process"),
                },
            }
        });

        Ok(TrackStream::new(frames_rx, stop_tx))
    }
}
