//! Voice session and transcoder configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// External process invocation. `{guild_id}` and `{channel_id}` in `args`
/// are replaced per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TranscoderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for TranscoderCommand {
    fn default() -> Self {
        Self {
            program: "ffmpeg".into(),
            args: Vec::new(),
        }
    }
}

impl TranscoderCommand {
    fn ffmpeg(input: &[&str], output: &[&str]) -> Self {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(input.iter().map(|s| s.to_string()));
        args.extend(["-i", "pipe:0"].iter().map(|s| s.to_string()));
        args.extend(output.iter().map(|s| s.to_string()));
        args.push("pipe:1".into());
        Self {
            program: "ffmpeg".into(),
            args,
        }
    }
}

/// Voice settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub enabled: bool,
    /// Frames buffered per direction before the oldest are dropped (valid range: 1-4096).
    pub frame_queue_capacity: usize,
    /// Seconds allowed for the platform join and transcoder start together.
    pub join_timeout_secs: u64,
    /// Seconds a transcoder gets to exit after its input closes before it is killed.
    pub leave_grace_secs: u64,
    /// Bytes per frame read from transcoder output.
    pub frame_bytes: usize,
    /// Platform codec in, backend codec out.
    pub encoder: TranscoderCommand,
    /// Backend codec in, platform codec out.
    pub decoder: TranscoderCommand,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_queue_capacity: 64,
            join_timeout_secs: 10,
            leave_grace_secs: 3,
            // 20ms of 16kHz mono s16le
            frame_bytes: 640,
            encoder: TranscoderCommand::ffmpeg(
                &["-f", "s16le", "-ar", "48000", "-ac", "2"],
                &["-f", "s16le", "-ar", "16000", "-ac", "1"],
            ),
            decoder: TranscoderCommand::ffmpeg(
                &["-f", "s16le", "-ar", "16000", "-ac", "1"],
                &["-f", "s16le", "-ar", "48000", "-ac", "2"],
            ),
        }
    }
}

impl VoiceConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn leave_grace(&self) -> Duration {
        Duration::from_secs(self.leave_grace_secs)
    }
}
