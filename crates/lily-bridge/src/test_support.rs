//! In-memory platform, transcoder and voice backend for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lily_common::{
    AudioFrame, BridgeError, LinkError, MusicError, PlatformError, TranscoderError,
};
use tokio::sync::{mpsc, oneshot};

use crate::music::{Track, TrackPlayer, TrackResolver, TrackStream};
use crate::platform::{PlatformClient, VoiceConnection, VoiceJoinRequest};
use crate::transcoder::{transcoder_channel, Transcoder, TranscoderHandle};
use crate::voice::VoiceBackend;

/// Poll `check` every 10ms until it holds or two seconds pass.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub fn join_request(guild: &str) -> VoiceJoinRequest {
    VoiceJoinRequest {
        guild_id: guild.into(),
        channel_id: format!("voice-{guild}"),
        user_id: "u1".into(),
        reply_channel_id: Some(format!("text-{guild}")),
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// The test's end of a joined voice channel.
pub struct FakeVoiceChannel {
    pub capture_tx: mpsc::Sender<AudioFrame>,
    pub playback_rx: mpsc::Receiver<AudioFrame>,
}

#[derive(Default)]
pub struct FakePlatform {
    pub sent: Mutex<Vec<(String, String)>>,
    pub joins: AtomicUsize,
    pub leaves: Mutex<Vec<String>>,
    pub channels: Mutex<HashMap<String, FakeVoiceChannel>>,
    pub join_error: Mutex<Option<PlatformError>>,
    pub join_delay: Mutex<Option<Duration>>,
}

impl FakePlatform {
    pub fn sent_texts(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts_to(&self, channel: &str) -> Vec<String> {
        self.sent_texts()
            .into_iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, t)| t)
            .collect()
    }

    pub fn leave_count(&self, guild: &str) -> usize {
        self.leaves.lock().unwrap().iter().filter(|g| *g == guild).count()
    }

    pub fn take_channel(&self, guild: &str) -> Option<FakeVoiceChannel> {
        self.channels.lock().unwrap().remove(guild)
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn send_text(&self, channel_id: &str, text: &str) -> Result<(), PlatformError> {
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn join_voice(
        &self,
        guild_id: &str,
        _channel_id: &str,
    ) -> Result<VoiceConnection, PlatformError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        let delay = *self.join_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.join_error.lock().unwrap().clone() {
            return Err(err);
        }
        let (capture_tx, capture) = mpsc::channel(64);
        let (playback, playback_rx) = mpsc::channel(64);
        self.channels.lock().unwrap().insert(
            guild_id.to_string(),
            FakeVoiceChannel {
                capture_tx,
                playback_rx,
            },
        );
        Ok(VoiceConnection { capture, playback })
    }

    async fn leave_voice(&self, guild_id: &str) -> Result<(), PlatformError> {
        self.leaves.lock().unwrap().push(guild_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transcoder
// ---------------------------------------------------------------------------

/// Passes bytes through unchanged. Each started instance can be crashed.
#[derive(Default)]
pub struct FakeTranscoder {
    pub starts: AtomicUsize,
    pub stops: Arc<AtomicUsize>,
    pub fail_start: AtomicBool,
    crash: Mutex<Vec<oneshot::Sender<()>>>,
}

impl FakeTranscoder {
    /// Make the most recently started instance exit with an error.
    pub fn crash_latest(&self) -> bool {
        match self.crash.lock().unwrap().pop() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn start(
        &self,
        _guild_id: &str,
        _channel_id: &str,
    ) -> Result<TranscoderHandle, TranscoderError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(TranscoderError::Spawn("no such program".into()));
        }

        let (handle, worker) = transcoder_channel(16);
        let (crash_tx, crash_rx) = oneshot::channel();
        self.crash.lock().unwrap().push(crash_tx);
        let stops = Arc::clone(&self.stops);

        tokio::spawn(async move {
            let mut encode_rx = worker.encode_rx;
            let mut decode_rx = worker.decode_rx;
            let encoded_tx = worker.encoded_tx;
            let decoded_tx = worker.decoded_tx;
            let encode = tokio::spawn(async move {
                while let Some(bytes) = encode_rx.recv().await {
                    if encoded_tx.send(bytes).await.is_err() {
                        break;
                    }
                }
            });
            let decode = tokio::spawn(async move {
                while let Some(bytes) = decode_rx.recv().await {
                    if decoded_tx.send(bytes).await.is_err() {
                        break;
                    }
                }
            });

            let result = tokio::select! {
                _ = worker.stop_rx => {
                    stops.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                Ok(()) = crash_rx => Err(TranscoderError::Exited("encoder exit status: 1".into())),
            };
            encode.abort();
            decode.abort();
            let _ = worker.exit_tx.send(result);
        });

        Ok(handle)
    }
}

// ---------------------------------------------------------------------------
// Voice backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeVoiceBackend {
    pub joins: AtomicUsize,
    pub reject: Mutex<Option<String>>,
    pub link_down: AtomicBool,
    pub frames: Mutex<Vec<(String, AudioFrame)>>,
    pub leaves: Mutex<Vec<String>>,
}

impl FakeVoiceBackend {
    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|(_, f)| f.data.clone())
            .collect()
    }

    pub fn leave_count(&self) -> usize {
        self.leaves.lock().unwrap().len()
    }
}

#[async_trait]
impl VoiceBackend for FakeVoiceBackend {
    async fn join(
        &self,
        _request: &VoiceJoinRequest,
        _timeout: Duration,
    ) -> Result<(), BridgeError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        if self.link_down.load(Ordering::SeqCst) {
            return Err(LinkError::LinkDown.into());
        }
        match self.reject.lock().unwrap().clone() {
            Some(reason) => Err(BridgeError::Rejected(reason)),
            None => Ok(()),
        }
    }

    fn send_frame(&self, guild_id: &str, frame: &AudioFrame) -> Result<(), BridgeError> {
        if self.link_down.load(Ordering::SeqCst) {
            return Err(LinkError::LinkDown.into());
        }
        self.frames
            .lock()
            .unwrap()
            .push((guild_id.to_string(), frame.clone()));
        Ok(())
    }

    fn leave(&self, guild_id: &str) -> Result<(), BridgeError> {
        self.leaves.lock().unwrap().push(guild_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Music
// ---------------------------------------------------------------------------

/// Titles are the query upper-cased. Queries starting with "locked" need
/// sign-in and "broken" ones fail.
pub struct FakeTrackResolver;

#[async_trait]
impl TrackResolver for FakeTrackResolver {
    async fn resolve(&self, query: &str) -> Result<Track, MusicError> {
        if query.starts_with("locked") {
            return Err(MusicError::SignInRequired);
        }
        if query.starts_with("broken") {
            return Err(MusicError::Resolve("HTTP 404".into()));
        }
        Ok(Track {
            title: query.to_uppercase(),
            stream_url: query.to_string(),
        })
    }
}

/// Each track is one frame holding its url. Urls starting with "endless"
/// keep the track open until it is stopped.
#[derive(Default)]
pub struct FakeTrackPlayer {
    pub opened: Mutex<Vec<String>>,
    pub stopped: Arc<AtomicUsize>,
}

#[async_trait]
impl TrackPlayer for FakeTrackPlayer {
    async fn open(&self, track: &Track) -> Result<TrackStream, MusicError> {
        self.opened.lock().unwrap().push(track.title.clone());
        let (frames_tx, frames_rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let url = track.stream_url.clone();
        let stopped = Arc::clone(&self.stopped);
        tokio::spawn(async move {
            let _ = frames_tx.send(url.as_bytes().to_vec()).await;
            if url.starts_with("endless") {
                let _ = stop_rx.await;
                stopped.fetch_add(1, Ordering::SeqCst);
            }
        });
        Ok(TrackStream::new(frames_rx, stop_tx))
    }
}
