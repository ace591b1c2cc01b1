//! Music playback configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::TranscoderCommand;

/// Music queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicConfig {
    pub enabled: bool,
    /// Tracks waiting per guild, the playing one excluded (valid range: 1-500).
    pub max_queue: usize,
    /// Seconds the track lookup may take before the track is skipped.
    pub resolve_timeout_secs: u64,
    /// Seconds the bot stays in the voice channel with nothing queued.
    pub idle_leave_secs: u64,
    /// Bytes per playback frame (20ms of 48kHz stereo s16le by default).
    pub frame_bytes: usize,
    /// Track lookup tool. Gets the requested url or search text last and
    /// must print one JSON document.
    pub resolver: TranscoderCommand,
    /// Stream reader. `{url}` in `args` is replaced by the resolved stream
    /// url; output is raw platform audio on stdout.
    pub player: TranscoderCommand,
    /// Cookies file handed to the resolver when it exists. Also the file the
    /// cookies API reads and writes.
    pub cookies_path: PathBuf,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_queue: 50,
            resolve_timeout_secs: 30,
            idle_leave_secs: 300,
            frame_bytes: 3840,
            resolver: TranscoderCommand {
                program: "yt-dlp".into(),
                args: [
                    "--no-playlist",
                    "--quiet",
                    "--no-warnings",
                    "--default-search",
                    "auto",
                    "--dump-single-json",
                    "-f",
                    "bestaudio/best",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            },
            player: TranscoderCommand {
                program: "ffmpeg".into(),
                args: [
                    "-hide_banner",
                    "-loglevel",
                    "error",
                    "-re",
                    "-reconnect",
                    "1",
                    "-reconnect_streamed",
                    "1",
                    "-reconnect_delay_max",
                    "5",
                    "-i",
                    "{url}",
                    "-vn",
                    "-f",
                    "s16le",
                    "-ar",
                    "48000",
                    "-ac",
                    "2",
                    "pipe:1",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            },
            cookies_path: PathBuf::from("/app/data/cookies.txt"),
        }
    }
}

impl MusicConfig {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn idle_leave(&self) -> Duration {
        Duration::from_secs(self.idle_leave_secs)
    }
}
