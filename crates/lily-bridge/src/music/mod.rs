//! Music playback: a per-guild queue of tracks streamed into the voice
//! channel of whoever asked.
//!
//! Each guild with music gets one player task. It joins the voice channel,
//! looks tracks up one at a time, streams their frames into the playback
//! side of the [`VoiceConnection`] and leaves after sitting idle with an
//! empty queue. A guild is either in a music session or a voice
//! conversation, never both.

mod player;
mod resolver;


pub use player::ProcessPlayer;
pub use resolver::YtDlpResolver;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use lily_common::{AudioFrame, MusicError};
use lily_config::schema::MusicConfig;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use crate::platform::{PlatformClient, VoiceConnection};

const SIGN_IN_REPLY: &str = "I couldn't play that song because YouTube requires sign-in. Please try a different song or check bot configuration.";
const PLAY_FAILED_REPLY: &str = "An error occurred playing this song.";
const NOTHING_PLAYING_REPLY: &str = "Nothing is currently playing.";

// ---------------------------------------------------------------------------
// Tracks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub title: String,
    pub stream_url: String,
}

/// Turns a url or search text into a playable track.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<Track, MusicError>;
}

/// Starts streaming a resolved track.
#[async_trait]
pub trait TrackPlayer: Send + Sync {
    async fn open(&self, track: &Track) -> Result<TrackStream, MusicError>;
}

/// Audio of one playing track. Dropping it stops the source.
pub struct TrackStream {
    frames: mpsc::Receiver<Vec<u8>>,
    _stop: oneshot::Sender<()>,
}

impl TrackStream {
    pub fn new(frames: mpsc::Receiver<Vec<u8>>, stop: oneshot::Sender<()>) -> Self {
        Self {
            frames,
            _stop: stop,
        }
    }

    /// `None` once the track has ended.
    pub async fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.frames.recv().await
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MusicSettings {
    pub max_queue: usize,
    pub idle_leave: Duration,
    /// How long `shutdown` waits for players to leave.
    pub stop_timeout: Duration,
}

impl From<&MusicConfig> for MusicSettings {
    fn from(config: &MusicConfig) -> Self {
        Self {
            max_queue: config.max_queue,
            idle_leave: config.idle_leave(),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
enum Command {
    Enqueue { query: String, reply_to: String },
    Skip { reply_to: String },
    Stop { reply_to: Option<String> },
}

struct GuildPlayer {
    tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Cheap to clone; all clones share the same players.
#[derive(Clone)]
pub struct MusicService {
    inner: Arc<Inner>,
}

struct Inner {
    platform: Arc<dyn PlatformClient>,
    resolver: Arc<dyn TrackResolver>,
    player: Arc<dyn TrackPlayer>,
    settings: MusicSettings,
    guilds: Mutex<HashMap<String, GuildPlayer>>,
}

impl MusicService {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        resolver: Arc<dyn TrackResolver>,
        player: Arc<dyn TrackPlayer>,
        settings: MusicSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                platform,
                resolver,
                player,
                settings,
                guilds: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Process-backed resolver and player built from config. `grace` bounds
    /// how long a stopped player process gets before it is killed.
    pub fn from_config(
        platform: Arc<dyn PlatformClient>,
        config: &MusicConfig,
        grace: Duration,
    ) -> Self {
        Self::new(
            platform,
            Arc::new(YtDlpResolver::from_config(config)),
            Arc::new(ProcessPlayer::from_config(config, grace)),
            MusicSettings::from(config),
        )
    }

    fn guilds(&self) -> MutexGuard<'_, HashMap<String, GuildPlayer>> {
        self.inner
            .guilds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a player is running in the guild.
    pub fn is_active(&self, guild_id: &str) -> bool {
        self.guilds()
            .get(guild_id)
            .is_some_and(|p| !p.task.is_finished())
    }

    pub fn active_count(&self) -> usize {
        self.guilds()
            .values()
            .filter(|p| !p.task.is_finished())
            .count()
    }

    /// Queue a track, joining `voice_channel_id` first if the guild has no
    /// player yet.
    pub fn play(&self, guild_id: &str, voice_channel_id: &str, query: &str, reply_to: &str) {
        let mut command = Command::Enqueue {
            query: query.to_string(),
            reply_to: reply_to.to_string(),
        };
        let mut guilds = self.guilds();
        guilds.retain(|_, p| !p.task.is_finished());

        let previous = match guilds.remove(guild_id) {
            Some(player) => match player.tx.send(command) {
                Ok(()) => {
                    guilds.insert(guild_id.to_string(), player);
                    return;
                }
                // Idle player on its way out; the new one waits for it.
                Err(mpsc::error::SendError(returned)) => {
                    command = returned;
                    Some(player.task)
                }
            },
            None => None,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(command);
        let span = tracing::info_span!("music", guild_id = %guild_id);
        let task = tokio::spawn(
            run_player(
                Arc::clone(&self.inner),
                guild_id.to_string(),
                voice_channel_id.to_string(),
                rx,
                previous,
            )
            .instrument(span),
        );
        guilds.insert(guild_id.to_string(), GuildPlayer { tx, task });
    }

    /// Skip the playing track. `false` when the guild has no player.
    pub fn skip(&self, guild_id: &str, reply_to: &str) -> bool {
        self.send(
            guild_id,
            Command::Skip {
                reply_to: reply_to.to_string(),
            },
        )
    }

    /// Clear the queue and leave. `false` when the guild has no player.
    pub fn stop(&self, guild_id: &str, reply_to: &str) -> bool {
        self.send(
            guild_id,
            Command::Stop {
                reply_to: Some(reply_to.to_string()),
            },
        )
    }

    fn send(&self, guild_id: &str, command: Command) -> bool {
        self.guilds()
            .get(guild_id)
            .is_some_and(|p| p.tx.send(command).is_ok())
    }

    /// Stop every player and wait for them to leave their channels.
    pub async fn shutdown(&self) {
        let players: Vec<(String, GuildPlayer)> = self.guilds().drain().collect();
        if players.is_empty() {
            return;
        }
        info!(players = players.len(), "stopping music players");
        for (_, player) in &players {
            let _ = player.tx.send(Command::Stop { reply_to: None });
        }
        for (guild_id, player) in players {
            let abort = player.task.abort_handle();
            if tokio::time::timeout(self.inner.settings.stop_timeout, player.task)
                .await
                .is_err()
            {
                warn!(guild_id = %guild_id, "music player did not stop in time");
                abort.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Player task
// ---------------------------------------------------------------------------

struct Queued {
    query: String,
    reply_to: String,
}

enum Exit {
    Stopped,
    Idle,
    ConnectionLost,
    ServiceGone,
}

async fn run_player(
    inner: Arc<Inner>,
    guild_id: String,
    voice_channel_id: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let connection = match inner.platform.join_voice(&guild_id, &voice_channel_id).await {
        Ok(connection) => connection,
        Err(e) => {
            warn!(error = %e, "could not join voice channel for music");
            commands.close();
            while let Some(command) = commands.recv().await {
                if let Command::Enqueue { reply_to, .. } = command {
                    send(&inner, &reply_to, "I couldn't join your voice channel.").await;
                    break;
                }
            }
            return;
        }
    };
    info!(channel_id = %voice_channel_id, "joined voice channel for music");

    let exit = play_queue(&inner, connection, &mut commands).await;
    match exit {
        Exit::Stopped => info!("music stopped"),
        Exit::Idle => info!("music idle, leaving voice channel"),
        Exit::ConnectionLost => warn!("voice connection lost during music"),
        Exit::ServiceGone => debug!("music service dropped"),
    }
    if let Err(e) = inner.platform.leave_voice(&guild_id).await {
        debug!(error = %e, "leaving voice channel after music failed");
    }
}

async fn play_queue(
    inner: &Inner,
    connection: VoiceConnection,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Exit {
    let VoiceConnection {
        mut capture,
        playback,
    } = connection;
    let mut queue: VecDeque<Queued> = VecDeque::new();
    let mut playing: Option<TrackStream> = None;
    let mut idle_since: Option<Instant> = None;
    let mut closing = false;
    let mut commands_done = false;
    let mut seq = 0u64;

    loop {
        if playing.is_none() {
            while let Some(next) = queue.pop_front() {
                if let Some(started) = start_track(inner, next).await {
                    playing = Some(started);
                    break;
                }
            }
        }

        let idle = playing.is_none() && queue.is_empty();
        if idle && commands_done {
            return if closing { Exit::Idle } else { Exit::ServiceGone };
        }
        let idle_deadline = match (idle, idle_since) {
            (false, _) => {
                idle_since = None;
                None
            }
            (true, Some(since)) => Some(since + inner.settings.idle_leave),
            (true, None) => {
                let now = Instant::now();
                idle_since = Some(now);
                Some(now + inner.settings.idle_leave)
            }
        };
        tokio::select! {
            command = commands.recv(), if !commands_done => match command {
                // Whatever was queued before the close still plays.
                None => commands_done = true,
                Some(Command::Enqueue { query, reply_to }) => {
                    if queue.len() >= inner.settings.max_queue {
                        debug!(error = %MusicError::QueueFull, query = %query, "track refused");
                        send(inner, &reply_to, "The music queue is full. Try again after a few songs.").await;
                        continue;
                    }
                    send(inner, &reply_to, &format!("Added to queue: {query}")).await;
                    queue.push_back(Queued { query, reply_to });
                }
                Some(Command::Skip { reply_to }) => {
                    if playing.take().is_some() {
                        send(inner, &reply_to, "Skipped current song.").await;
                    } else {
                        send(inner, &reply_to, NOTHING_PLAYING_REPLY).await;
                    }
                }
                Some(Command::Stop { reply_to }) => {
                    queue.clear();
                    playing = None;
                    if let Some(reply_to) = reply_to {
                        send(inner, &reply_to, "Stopped playing and disconnected.").await;
                    }
                    return Exit::Stopped;
                }
            },

            frame = next_frame(&mut playing) => match frame {
                Some(data) => {
                    if playback.send(AudioFrame::new(seq, data)).await.is_err() {
                        return Exit::ConnectionLost;
                    }
                    seq += 1;
                }
                None => {
                    debug!("track finished");
                    playing = None;
                }
            },

            // Music never listens; the capture side only tells us the
            // connection is gone.
            frame = capture.recv() => {
                if frame.is_none() {
                    return Exit::ConnectionLost;
                }
            }

            // Closing first means a request racing the exit is either
            // served here or refused and handed to a fresh player.
            _ = sleep_until(idle_deadline), if !closing => {
                closing = true;
                commands.close();
            }
        }
    }
}

/// Look a track up and start it. Failures are reported to the requester and
/// yield `None` so the next track gets its turn.
async fn start_track(inner: &Inner, next: Queued) -> Option<TrackStream> {
    let started = async {
        let track = inner.resolver.resolve(&next.query).await?;
        let stream = inner.player.open(&track).await?;
        Ok::<_, MusicError>((track, stream))
    }
    .await;

    match started {
        Ok((track, stream)) => {
            info!(title = %track.title, "now playing");
            send(inner, &next.reply_to, &format!("Now playing: **{}**", track.title)).await;
            Some(stream)
        }
        Err(e) => {
            warn!(query = %next.query, error = %e, "track failed to play");
            let reply = match e {
                MusicError::SignInRequired => SIGN_IN_REPLY,
                _ => PLAY_FAILED_REPLY,
            };
            send(inner, &next.reply_to, reply).await;
            None
        }
    }
}

async fn next_frame(playing: &mut Option<TrackStream>) -> Option<Vec<u8>> {
    match playing {
        Some(stream) => stream.next_frame().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn send(inner: &Inner, channel: &str, text: &str) {
    if let Err(e) = inner.platform.send_text(channel, text).await {
        warn!(channel_id = channel, error = %e, "failed to send music message");
    }
}
