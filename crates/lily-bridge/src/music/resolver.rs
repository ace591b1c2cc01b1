//! Track lookup through an external tool (yt-dlp by default).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use lily_common::MusicError;
use lily_config::schema::{MusicConfig, TranscoderCommand};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{Track, TrackResolver};

const SIGN_IN_MARKER: &str = "Sign in to confirm";

/// Runs the resolver once per request. The query goes last; the tool must
/// print one JSON document describing the track (or a playlist whose first
/// entry is used).
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    command: TranscoderCommand,
    cookies_path: PathBuf,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(command: TranscoderCommand, cookies_path: PathBuf, timeout: Duration) -> Self {
        Self {
            command,
            cookies_path,
            timeout,
        }
    }

    pub fn from_config(config: &MusicConfig) -> Self {
        Self::new(
            config.resolver.clone(),
            config.cookies_path.clone(),
            config.resolve_timeout(),
        )
    }

    async fn args(&self, query: &str) -> Vec<String> {
        let mut args = self.command.args.clone();
        if tokio::fs::try_exists(&self.cookies_path)
            .await
            .unwrap_or(false)
        {
            debug!(path = %self.cookies_path.display(), "using cookies file");
            args.push("--cookies".into());
            args.push(self.cookies_path.display().to_string());
        }
        args.push(query.to_string());
        args
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<Track, MusicError> {
        let args = self.args(query).await;
        info!(program = %self.command.program, query, "resolving track");

        let output = Command::new(&self.command.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| MusicError::Timeout)?
            .map_err(|e| MusicError::Resolve(format!("{}: {e}", self.command.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            warn!(status = %output.status, stderr, "track lookup failed");
            if stderr.contains(SIGN_IN_MARKER) {
                return Err(MusicError::SignInRequired);
            }
            return Err(MusicError::Resolve(if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr.to_string()
            }));
        }
        parse_track(&output.stdout)
    }
}

#[derive(Deserialize)]
struct TrackInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    entries: Option<Vec<TrackInfo>>,
}

/// Pick the playable track out of the resolver's JSON output.
pub(crate) fn parse_track(output: &[u8]) -> Result<Track, MusicError> {
    let info: TrackInfo = serde_json::from_slice(output)
        .map_err(|e| MusicError::Resolve(format!("unreadable lookup output: {e}")))?;
    let info = match info.entries {
        Some(entries) => entries
            .into_iter()
            .next()
            .ok_or_else(|| MusicError::Resolve("no results".into()))?,
        None => info,
    };
    let stream_url = info
        .url
        .filter(|url| !url.is_empty())
        .ok_or_else(|| MusicError::Resolve("no stream url".into()))?;
    Ok(Track {
        title: info.title.unwrap_or_else(|| stream_url.clone()),
        stream_url,
    })
}
