//! External player process as a media backend
//!
//! Each stream is one `ffplay -nodisp -autoexit` child. A watcher task per
//! child reports elapsed time once a second and reports how the child
//! ended. Pause and resume stop and continue the child process (unix only).

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{MediaBackend, MediaEvent, MediaEventKind, PlaybackError};
use crate::acquisition::ytdlp::drain;

/// Interval between position reports
const TICK: Duration = Duration::from_secs(1);

pub struct ExternalPlayer {
    program: PathBuf,
    events: UnboundedSender<MediaEvent>,
    generation: u64,
    current: Option<Stream>,
}

struct Stream {
    pid: Option<u32>,
    paused: Arc<AtomicBool>,
    stop: oneshot::Sender<()>,
}

impl ExternalPlayer {
    pub fn new(program: impl Into<PathBuf>, events: UnboundedSender<MediaEvent>) -> Self {
        Self {
            program: program.into(),
            events,
            generation: 0,
            current: None,
        }
    }

    fn signal(&self, paused: bool) -> Result<(), PlaybackError> {
        let stream = self
            .current
            .as_ref()
            .ok_or_else(|| PlaybackError::Backend("nothing is playing".to_string()))?;
        let pid = stream
            .pid
            .ok_or_else(|| PlaybackError::Backend("player has already exited".to_string()))?;
        send_signal(pid, paused)?;
        stream.paused.store(paused, Ordering::SeqCst);
        Ok(())
    }
}

impl MediaBackend for ExternalPlayer {
    fn start(&mut self, url: &str) -> Result<u64, PlaybackError> {
        self.stop();

        let mut child = Command::new(&self.program)
            .args(["-nodisp", "-autoexit", "-loglevel", "error"])
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PlaybackError::Backend(format!("failed to start {}: {}", self.program.display(), e))
            })?;

        self.generation += 1;
        let generation = self.generation;
        let paused = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = oneshot::channel();

        self.current = Some(Stream {
            pid: child.id(),
            paused: paused.clone(),
            stop: stop_tx,
        });

        let stderr = child.stderr.take();
        let events = self.events.clone();
        tokio::spawn(async move {
            let stderr_task = tokio::spawn(drain(stderr));
            if let Some(kind) = watch(&mut child, stop_rx, paused, generation, &events).await {
                let kind = match kind {
                    MediaEventKind::Error(reason) => {
                        let stderr = stderr_task.await.unwrap_or_default();
                        let detail = stderr.lines().rev().find(|l| !l.trim().is_empty());
                        MediaEventKind::Error(match detail {
                            Some(line) => format!("{} ({})", reason, line.trim()),
                            None => reason,
                        })
                    }
                    other => other,
                };
                let _ = events.send(MediaEvent { generation, kind });
            }
        });

        debug!("Started stream {}", generation);
        Ok(generation)
    }

    fn pause(&mut self) -> Result<(), PlaybackError> {
        self.signal(true)
    }

    fn resume(&mut self) -> Result<(), PlaybackError> {
        self.signal(false)
    }

    fn stop(&mut self) {
        if let Some(stream) = self.current.take() {
            // The watcher may already be gone
            let _ = stream.stop.send(());
            debug!("Stopped stream {}", self.generation);
        }
    }
}

impl Drop for ExternalPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Follow one child until it exits or is told to stop
///
/// Returns the terminal event, or `None` when stopped from our side.
async fn watch(
    child: &mut Child,
    mut stop: oneshot::Receiver<()>,
    paused: Arc<AtomicBool>,
    generation: u64,
    events: &UnboundedSender<MediaEvent>,
) -> Option<MediaEventKind> {
    let mut ticker = tokio::time::interval(TICK);
    ticker.tick().await;
    let mut elapsed = Duration::ZERO;

    loop {
        tokio::select! {
            _ = &mut stop => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to stop player: {}", e);
                }
                return None;
            }
            status = child.wait() => {
                return Some(match status {
                    Ok(status) if status.success() => MediaEventKind::EndOfMedia,
                    Ok(status) => MediaEventKind::Error(format!("player exited with {}", status)),
                    Err(e) => MediaEventKind::Error(e.to_string()),
                });
            }
            _ = ticker.tick() => {
                if !paused.load(Ordering::SeqCst) {
                    elapsed += TICK;
                    let _ = events.send(MediaEvent {
                        generation,
                        kind: MediaEventKind::Position(elapsed),
                    });
                }
            }
        }
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, paused: bool) -> Result<(), PlaybackError> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pid = i32::try_from(pid)
        .map_err(|_| PlaybackError::Backend(format!("invalid process id {}", pid)))?;
    let signal = if paused {
        Signal::SIGSTOP
    } else {
        Signal::SIGCONT
    };
    kill(Pid::from_raw(pid), signal)
        .map_err(|e| PlaybackError::Backend(format!("failed to send {:?}: {}", signal, e)))
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _paused: bool) -> Result<(), PlaybackError> {
    Err(PlaybackError::Backend(
        "pausing is not supported on this platform".to_string(),
    ))
}
