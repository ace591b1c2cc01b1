//! Transcoder backed by two external processes (ffmpeg by default).

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use lily_common::TranscoderError;
use lily_config::schema::{TranscoderCommand, VoiceConfig};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{transcoder_channel, Transcoder, TranscoderHandle};

/// Spawns an encoder and a decoder process per session. Process stdout is
/// cut into fixed-size frames of `frame_bytes`.
#[derive(Debug, Clone)]
pub struct ProcessTranscoder {
    encoder: TranscoderCommand,
    decoder: TranscoderCommand,
    frame_bytes: usize,
    grace: Duration,
    channel_capacity: usize,
}

impl ProcessTranscoder {
    pub fn new(
        encoder: TranscoderCommand,
        decoder: TranscoderCommand,
        frame_bytes: usize,
        grace: Duration,
    ) -> Self {
        Self {
            encoder,
            decoder,
            frame_bytes: frame_bytes.max(1),
            grace,
            channel_capacity: 32,
        }
    }

    pub fn from_config(config: &VoiceConfig) -> Self {
        Self::new(
            config.encoder.clone(),
            config.decoder.clone(),
            config.frame_bytes,
            config.leave_grace(),
        )
    }
}

/// Substitute `{guild_id}` and `{channel_id}` in every argument.
pub(crate) fn expand_args(args: &[String], guild_id: &str, channel_id: &str) -> Vec<String> {
    args.iter()
        .map(|arg| {
            arg.replace("{guild_id}", guild_id)
                .replace("{channel_id}", channel_id)
        })
        .collect()
}

struct Spawned {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

fn spawn(
    role: &'static str,
    command: &TranscoderCommand,
    guild_id: &str,
    channel_id: &str,
) -> Result<Spawned, TranscoderError> {
    let args = expand_args(&command.args, guild_id, channel_id);
    info!(role, program = %command.program, args = ?args, guild_id, "spawning transcoder process");

    let mut child = Command::new(&command.program)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TranscoderError::Spawn(format!("{role} ({}): {e}", command.program)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| TranscoderError::Spawn(format!("{role}: failed to capture stdin")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TranscoderError::Spawn(format!("{role}: failed to capture stdout")))?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(log_stderr(role, stderr));
    }

    Ok(Spawned {
        child,
        stdin,
        stdout,
    })
}

#[async_trait]
impl Transcoder for ProcessTranscoder {
    async fn start(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<TranscoderHandle, TranscoderError> {
        let encoder = spawn("encoder", &self.encoder, guild_id, channel_id)?;
        // kill_on_drop takes the encoder down if this fails.
        let decoder = spawn("decoder", &self.decoder, guild_id, channel_id)?;

        let (handle, worker) = transcoder_channel(self.channel_capacity);

        let writers = [
            tokio::spawn(feed_stdin("encoder", encoder.stdin, worker.encode_rx)),
            tokio::spawn(feed_stdin("decoder", decoder.stdin, worker.decode_rx)),
        ];
        let readers = [
            tokio::spawn(read_frames(
                "encoder",
                encoder.stdout,
                worker.encoded_tx,
                self.frame_bytes,
            )),
            tokio::spawn(read_frames(
                "decoder",
                decoder.stdout,
                worker.decoded_tx,
                self.frame_bytes,
            )),
        ];

        tokio::spawn(supervise(
            encoder.child,
            decoder.child,
            writers,
            readers,
            worker.stop_rx,
            worker.exit_tx,
            self.grace,
        ));

        Ok(handle)
    }
}

// ---------------------------------------------------------------------------
// Process I/O
// ---------------------------------------------------------------------------

async fn feed_stdin(role: &'static str, mut stdin: ChildStdin, mut input: mpsc::Receiver<Vec<u8>>) {
    while let Some(bytes) = input.recv().await {
        if let Err(e) = stdin.write_all(&bytes).await {
            debug!(role, error = %e, "transcoder stdin closed");
            return;
        }
    }
    let _ = stdin.shutdown().await;
}

/// Read `frame_bytes`-sized frames until EOF; a short trailing frame is
/// forwarded as-is.
pub(crate) async fn read_frames<R>(
    role: &'static str,
    mut stdout: R,
    output: mpsc::Sender<Vec<u8>>,
    frame_bytes: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; frame_bytes];
    let mut filled = 0;
    loop {
        match stdout.read(&mut buf[filled..]).await {
            Ok(0) => {
                if filled > 0 {
                    let _ = output.send(buf[..filled].to_vec()).await;
                }
                debug!(role, "transcoder stdout closed");
                return;
            }
            Ok(n) => {
                filled += n;
                if filled == frame_bytes {
                    if output.send(buf.clone()).await.is_err() {
                        return;
                    }
                    filled = 0;
                }
            }
            Err(e) => {
                warn!(role, error = %e, "error reading transcoder stdout");
                return;
            }
        }
    }
}

pub(crate) async fn log_stderr<R>(role: &'static str, stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if !line.is_empty() {
            debug!(role, stderr = %line, "transcoder stderr");
        }
    }
}

// ---------------------------------------------------------------------------
// Supervision
// ---------------------------------------------------------------------------

async fn supervise(
    mut encoder: Child,
    mut decoder: Child,
    writers: [JoinHandle<()>; 2],
    readers: [JoinHandle<()>; 2],
    stop_rx: oneshot::Receiver<()>,
    exit_tx: oneshot::Sender<Result<(), TranscoderError>>,
    grace: Duration,
) {
    let crashed = tokio::select! {
        // A dropped handle counts as a stop request.
        _ = stop_rx => None,
        status = encoder.wait() => Some(("encoder", status)),
        status = decoder.wait() => Some(("decoder", status)),
    };

    let result = match crashed {
        None => {
            // Dropping the stdin pipes lets the processes drain and exit.
            for writer in &writers {
                writer.abort();
            }
            tokio::join!(
                settle("encoder", &mut encoder, grace),
                settle("decoder", &mut decoder, grace)
            );
            Ok(())
        }
        Some((role, status)) => {
            let status = match status {
                Ok(status) => status.to_string(),
                Err(e) => e.to_string(),
            };
            warn!(role, status = %status, "transcoder process exited unexpectedly");
            for writer in &writers {
                writer.abort();
            }
            let _ = encoder.kill().await;
            let _ = decoder.kill().await;
            Err(TranscoderError::Exited(format!("{role} {status}")))
        }
    };

    for reader in &readers {
        reader.abort();
    }
    let _ = exit_tx.send(result);
}

/// Ask the process to terminate, wait `grace` for it to exit, then kill.
pub(crate) async fn settle(role: &'static str, child: &mut Child, grace: Duration) {
    terminate(role, child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(role, status = %status, "transcoder process exited"),
        Ok(Err(e)) => warn!(role, error = %e, "failed to wait for transcoder process"),
        Err(_) => {
            warn!(role, grace_ms = grace.as_millis() as u64, "transcoder ignored SIGTERM, killing");
            let _ = child.kill().await;
        }
    }
}

#[cfg(unix)]
fn terminate(role: &'static str, child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // No pid means it has already been reaped.
    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(role, pid, error = %e, "could not signal transcoder process");
        }
    }
}

#[cfg(not(unix))]
fn terminate(_role: &'static str, _child: &Child) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_expanded() {
        let args = vec![
            "--tag".to_string(),
            "{guild_id}-{channel_id}".to_string(),
            "plain".to_string(),
        ];
        assert_eq!(
            expand_args(&args, "g1", "c2"),
            vec!["--tag", "g1-c2", "plain"]
        );
    }

    #[tokio::test]
    async fn frames_are_cut_to_size() {
        let (tx, mut rx) = mpsc::channel(8);
        let input: &[u8] = &[1, 2, 3, 4, 5, 6, 7];
        read_frames("test", input, tx, 3).await;

        assert_eq!(rx.recv().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(rx.recv().await.unwrap(), vec![4, 5, 6]);
        assert_eq!(rx.recv().await.unwrap(), vec![7]);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let command = TranscoderCommand {
            program: "/nonexistent/lily-transcoder".into(),
            args: vec![],
        };
        let transcoder =
            ProcessTranscoder::new(command.clone(), command, 4, Duration::from_millis(100));
        let err = transcoder.start("g1", "c1").await.err().unwrap();
        assert!(matches!(err, TranscoderError::Spawn(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cat_round_trips_and_stops_cleanly() {
        let cat = TranscoderCommand {
            program: "cat".into(),
            args: vec![],
        };
        let transcoder = ProcessTranscoder::new(cat.clone(), cat, 4, Duration::from_secs(1));
        let TranscoderHandle {
            mut streams,
            control,
        } = transcoder.start("g1", "c1").await.unwrap();

        streams.encode_tx.send(vec![1, 2, 3, 4]).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), streams.encoded_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, vec![1, 2, 3, 4]);

        streams.decode_tx.send(vec![9, 9, 9, 9]).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), streams.decoded_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, vec![9, 9, 9, 9]);

        assert!(control.stop(Duration::from_secs(3)).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_terminates_processes_that_ignore_stdin() {
        let sleeper = TranscoderCommand {
            program: "sleep".into(),
            args: vec!["30".into()],
        };
        let transcoder = ProcessTranscoder::new(sleeper.clone(), sleeper, 4, Duration::from_secs(10));
        let handle = transcoder.start("g1", "c1").await.unwrap();

        let started = std::time::Instant::now();
        assert!(handle.control.stop(Duration::from_secs(12)).await.is_ok());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_exit_is_reported() {
        let quitter = TranscoderCommand {
            program: "sh".into(),
            args: vec!["-c".into(), "exit 3".into()],
        };
        let cat = TranscoderCommand {
            program: "cat".into(),
            args: vec![],
        };
        let transcoder = ProcessTranscoder::new(quitter, cat, 4, Duration::from_secs(1));
        let mut handle = transcoder.start("g1", "c1").await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(3), handle.control.exited())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, TranscoderError::Exited(ref msg) if msg.starts_with("encoder")));
    }
}
