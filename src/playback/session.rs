//! Playback session state machine
//!
//! Stream lookups run on a background task so the shell stays responsive
//! while a URL is resolved or a retry is waiting out its delay. Each lookup
//! carries a ticket; only the newest one is acted on.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{MediaBackend, MediaEvent, MediaEventKind, Notice, PlaybackError, PlaybackState};
use crate::acquisition::{AcquisitionError, StreamResolver};
use crate::catalog::AlbumMetadata;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Retries per row before giving up
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// A finished stream lookup, handed back through
/// [`PlaybackSession::handle_resolution`]
#[derive(Debug)]
pub struct Resolution {
    ticket: u64,
    row: usize,
    result: Result<String, AcquisitionError>,
}

/// Plays rows of one album, one at a time
///
/// Rows are 0-based indexes into the album's track list; row `n` is
/// playlist position `n + 1`.
pub struct PlaybackSession<R, B> {
    playlist_id: String,
    album: Arc<AlbumMetadata>,
    resolver: Arc<R>,
    backend: B,
    config: SessionConfig,
    notices: UnboundedSender<Notice>,
    resolutions: UnboundedSender<Resolution>,

    state: PlaybackState,
    current_row: Option<usize>,
    retries: u32,
    label: Option<String>,
    generation: Option<u64>,
    ticket: u64,
    lookup: Option<JoinHandle<()>>,
    position: Duration,
    duration: Option<Duration>,
}

impl<R: StreamResolver + 'static, B: MediaBackend> PlaybackSession<R, B> {
    pub fn new(
        playlist_id: impl Into<String>,
        album: Arc<AlbumMetadata>,
        resolver: Arc<R>,
        backend: B,
        config: SessionConfig,
        notices: UnboundedSender<Notice>,
        resolutions: UnboundedSender<Resolution>,
    ) -> Self {
        Self {
            playlist_id: playlist_id.into(),
            album,
            resolver,
            backend,
            config,
            notices,
            resolutions,
            state: PlaybackState::Stopped,
            current_row: None,
            retries: 0,
            label: None,
            generation: None,
            ticket: 0,
            lookup: None,
            position: Duration::ZERO,
            duration: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn current_row(&self) -> Option<usize> {
        self.current_row
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// A stream lookup is pending or waiting to retry
    pub fn is_resolving(&self) -> bool {
        self.lookup.is_some()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn position(&self) -> Duration {
        self.position
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn track_count(&self) -> usize {
        self.album.tracks.len()
    }

    /// Play `row`; toggles pause when that row is already loaded
    pub fn play(&mut self, row: usize) -> Result<(), PlaybackError> {
        if self.current_row == Some(row) && self.state != PlaybackState::Stopped {
            return self.toggle();
        }
        self.load(row)
    }

    pub fn toggle(&mut self) -> Result<(), PlaybackError> {
        match self.state {
            PlaybackState::Playing => {
                self.backend.pause()?;
                self.state = PlaybackState::Paused;
                info!("Pausing playback");
                self.notify(Notice::Paused);
            }
            PlaybackState::Paused => {
                self.backend.resume()?;
                self.state = PlaybackState::Playing;
                info!("Resuming playback");
                self.notify(Notice::Resumed);
            }
            PlaybackState::Stopped => debug!("Nothing to toggle"),
        }
        Ok(())
    }

    pub fn next(&mut self) -> Result<(), PlaybackError> {
        let Some(row) = self.current_row else {
            return Ok(());
        };
        if row + 1 < self.track_count() {
            self.load(row + 1)
        } else {
            info!("Reached the end of the track list");
            self.notify(Notice::EndOfList);
            self.stop();
            Ok(())
        }
    }

    /// Step back one row; does nothing on the first row
    pub fn previous(&mut self) -> Result<(), PlaybackError> {
        match self.current_row {
            Some(row) if row > 0 => self.load(row - 1),
            _ => Ok(()),
        }
    }

    /// Stop and forget the loaded row, abandoning any pending lookup
    pub fn stop(&mut self) {
        info!("Stopping playback");
        self.interrupt();
        self.state = PlaybackState::Stopped;
        self.current_row = None;
        self.retries = 0;
        self.label = None;
        self.position = Duration::ZERO;
        self.duration = None;
        self.notify(Notice::Stopped);
    }

    /// React to an event from the backend
    pub fn handle_media_event(&mut self, event: MediaEvent) -> Result<(), PlaybackError> {
        if self.generation != Some(event.generation) {
            debug!("Ignoring event from stream {}", event.generation);
            return Ok(());
        }

        match event.kind {
            MediaEventKind::Position(elapsed) => {
                self.position = elapsed;
                Ok(())
            }
            MediaEventKind::EndOfMedia => {
                self.generation = None;
                self.next()
            }
            MediaEventKind::Error(reason) => {
                error!("Player error: {}", reason);
                self.generation = None;
                self.retry_or_give_up(reason);
                Ok(())
            }
        }
    }

    /// Start the stream a lookup produced, or count its failure
    pub fn handle_resolution(&mut self, resolution: Resolution) -> Result<(), PlaybackError> {
        if self.lookup.is_none() || resolution.ticket != self.ticket {
            debug!("Ignoring superseded lookup {}", resolution.ticket);
            return Ok(());
        }
        self.lookup = None;

        let started = resolution
            .result
            .map_err(PlaybackError::from)
            .and_then(|url| self.start_row(resolution.row, &url));
        if let Err(e) = started {
            self.retry_or_give_up(e.to_string());
        }
        Ok(())
    }

    /// Interrupt whatever is loaded and look up `row`
    fn load(&mut self, row: usize) -> Result<(), PlaybackError> {
        if self.playlist_id.is_empty() {
            return Err(PlaybackError::NoPlaylist);
        }
        if row >= self.track_count() {
            return Err(PlaybackError::UnknownRow(row));
        }

        if self.current_row != Some(row) {
            self.retries = 0;
        }
        self.interrupt();
        self.state = PlaybackState::Stopped;
        self.current_row = Some(row);
        self.resolve(row, Duration::ZERO);
        Ok(())
    }

    /// Spawn the lookup for `row`, replacing any pending one
    fn resolve(&mut self, row: usize, delay: Duration) {
        self.ticket += 1;
        let ticket = self.ticket;
        let position = row as u32 + 1;
        let playlist_id = self.playlist_id.clone();
        let resolver = self.resolver.clone();
        let resolutions = self.resolutions.clone();

        let lookup = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            info!("Fetching stream URL for track {}", position);
            let result = resolver.resolve_stream(&playlist_id, position).await;
            // The session may be gone
            let _ = resolutions.send(Resolution {
                ticket,
                row,
                result,
            });
        });
        if let Some(previous) = self.lookup.replace(lookup) {
            previous.abort();
        }
    }

    fn start_row(&mut self, row: usize, url: &str) -> Result<(), PlaybackError> {
        debug!("Found stream URL: {}", url);
        let generation = self.backend.start(url)?;
        let track = &self.album.tracks[row];
        let label = track.display_label();

        self.generation = Some(generation);
        self.state = PlaybackState::Playing;
        self.position = Duration::ZERO;
        self.duration = track.duration.map(|secs| Duration::from_secs(secs.into()));
        self.label = Some(label.clone());
        info!("Playing track: {}", label);
        self.notify(Notice::Playing { row, label });
        Ok(())
    }

    /// Count a failure against the loaded row, then look it up again after
    /// the retry delay or give up and stop
    fn retry_or_give_up(&mut self, reason: String) {
        let Some(row) = self.current_row else {
            return;
        };
        if self.retries < self.config.max_retries {
            self.retries += 1;
            warn!(
                "Playback failed ({}), retrying {}/{}",
                reason, self.retries, self.config.max_retries
            );
            self.notify(Notice::Retrying {
                attempt: self.retries,
                max: self.config.max_retries,
            });
            self.resolve(row, self.config.retry_delay);
        } else {
            error!("Playback failed after {} retries: {}", self.retries, reason);
            self.notify(Notice::Failed { reason });
            self.stop();
        }
    }

    fn interrupt(&mut self) {
        if let Some(lookup) = self.lookup.take() {
            lookup.abort();
        }
        if self.generation.take().is_some() {
            self.backend.stop();
        }
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }
}

impl<R, B> Drop for PlaybackSession<R, B> {
    fn drop(&mut self) {
        if let Some(lookup) = self.lookup.take() {
            lookup.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TrackMetadata;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    /// Answers with queued results, then fails forever
    #[derive(Default)]
    struct ScriptedResolver {
        results: Mutex<VecDeque<Result<String, String>>>,
        calls: Mutex<Vec<u32>>,
    }

    impl ScriptedResolver {
        fn push(&self, result: Result<&str, &str>) {
            self.results
                .lock()
                .unwrap()
                .push_back(result.map(str::to_string).map_err(str::to_string));
        }

        fn calls(&self) -> Vec<u32> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StreamResolver for ScriptedResolver {
        async fn resolve_stream(
            &self,
            _playlist_id: &str,
            position: u32,
        ) -> Result<String, AcquisitionError> {
            self.calls.lock().unwrap().push(position);
            let next = self.results.lock().unwrap().pop_front();
            match next {
                Some(Ok(url)) => Ok(url),
                Some(Err(reason)) => Err(AcquisitionError::Protocol(reason)),
                None => Err(AcquisitionError::Protocol("unavailable".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingBackend {
        log: Arc<Mutex<Vec<String>>>,
        generation: u64,
    }

    impl MediaBackend for RecordingBackend {
        fn start(&mut self, url: &str) -> Result<u64, PlaybackError> {
            self.generation += 1;
            self.log.lock().unwrap().push(format!("start {}", url));
            Ok(self.generation)
        }

        fn pause(&mut self) -> Result<(), PlaybackError> {
            self.log.lock().unwrap().push("pause".to_string());
            Ok(())
        }

        fn resume(&mut self) -> Result<(), PlaybackError> {
            self.log.lock().unwrap().push("resume".to_string());
            Ok(())
        }

        fn stop(&mut self) {
            self.log.lock().unwrap().push("stop".to_string());
        }
    }

    /// A session plus the channels a shell would drive it from
    struct Rig {
        session: PlaybackSession<ScriptedResolver, RecordingBackend>,
        resolver: Arc<ScriptedResolver>,
        notices: UnboundedReceiver<Notice>,
        lookups: UnboundedReceiver<Resolution>,
    }

    impl Rig {
        fn new(retry_delay: Duration) -> Self {
            let album = AlbumMetadata {
                title: "X".to_string(),
                tracks: vec![
                    TrackMetadata {
                        title: "A".to_string(),
                        artists: vec!["Band".to_string()],
                        duration: Some(90),
                    },
                    TrackMetadata {
                        title: "B".to_string(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            };
            let resolver = Arc::new(ScriptedResolver::default());
            let (notice_tx, notices) = mpsc::unbounded_channel();
            let (lookup_tx, lookups) = mpsc::unbounded_channel();
            let config = SessionConfig {
                max_retries: 3,
                retry_delay,
            };
            let session = PlaybackSession::new(
                "OLAK5uy_x",
                Arc::new(album),
                resolver.clone(),
                RecordingBackend::default(),
                config,
                notice_tx,
                lookup_tx,
            );
            Self {
                session,
                resolver,
                notices,
                lookups,
            }
        }

        /// Feed lookups back until none is pending
        async fn settle(&mut self) {
            while self.session.is_resolving() {
                let resolution = self.lookups.recv().await.unwrap();
                self.session.handle_resolution(resolution).unwrap();
            }
        }

        async fn play(&mut self, row: usize) {
            self.session.play(row).unwrap();
            self.settle().await;
        }

        async fn media_event(&mut self, generation: u64, kind: MediaEventKind) {
            self.session
                .handle_media_event(MediaEvent { generation, kind })
                .unwrap();
            self.settle().await;
        }

        fn drain(&mut self) -> Vec<Notice> {
            let mut notices = Vec::new();
            while let Ok(notice) = self.notices.try_recv() {
                notices.push(notice);
            }
            notices
        }
    }

    fn rig() -> Rig {
        Rig::new(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_three_retries_then_stopped() {
        let mut rig = rig();

        rig.play(0).await;

        assert_eq!(rig.resolver.calls(), vec![1, 1, 1, 1]);
        assert_eq!(rig.session.state(), PlaybackState::Stopped);
        assert_eq!(rig.session.current_row(), None);
        assert_eq!(rig.session.retries(), 0);

        let notices = rig.drain();
        assert_eq!(
            &notices[..3],
            &[
                Notice::Retrying { attempt: 1, max: 3 },
                Notice::Retrying { attempt: 2, max: 3 },
                Notice::Retrying { attempt: 3, max: 3 },
            ]
        );
        assert!(matches!(notices[3], Notice::Failed { .. }));
        assert_eq!(notices[4], Notice::Stopped);
        assert_eq!(notices.len(), 5);
    }

    #[tokio::test]
    async fn test_row_change_resets_retry_counter() {
        let mut rig = rig();
        rig.resolver.push(Err("expired"));
        rig.resolver.push(Err("expired"));
        rig.resolver.push(Ok("https://stream/a"));

        rig.play(0).await;
        assert_eq!(rig.session.state(), PlaybackState::Playing);
        assert_eq!(rig.session.retries(), 2);

        rig.resolver.push(Ok("https://stream/b"));
        rig.play(1).await;
        assert_eq!(rig.session.current_row(), Some(1));
        assert_eq!(rig.session.retries(), 0);

        // A stream error on the new row starts counting from scratch
        rig.resolver.push(Ok("https://stream/b2"));
        rig.media_event(2, MediaEventKind::Error("decode".to_string()))
            .await;
        assert_eq!(rig.session.retries(), 1);
        assert_eq!(rig.session.state(), PlaybackState::Playing);

        let notices = rig.drain();
        assert!(notices.contains(&Notice::Retrying { attempt: 1, max: 3 }));
        assert_eq!(
            notices.last(),
            Some(&Notice::Playing {
                row: 1,
                label: "B".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_end_of_media_advances_then_stops() {
        let mut rig = rig();
        rig.resolver.push(Ok("https://stream/a"));
        rig.resolver.push(Ok("https://stream/b"));

        rig.play(0).await;
        assert_eq!(rig.session.label(), Some("A — Band"));
        assert_eq!(rig.session.duration(), Some(Duration::from_secs(90)));

        rig.media_event(1, MediaEventKind::EndOfMedia).await;
        assert_eq!(rig.session.current_row(), Some(1));
        assert_eq!(rig.resolver.calls(), vec![1, 2]);

        rig.media_event(2, MediaEventKind::EndOfMedia).await;
        assert_eq!(rig.session.state(), PlaybackState::Stopped);

        let notices = rig.drain();
        let tail = &notices[notices.len() - 2..];
        assert_eq!(tail, &[Notice::EndOfList, Notice::Stopped]);
    }

    #[tokio::test]
    async fn test_stale_events_are_ignored() {
        let mut rig = rig();
        rig.resolver.push(Ok("https://stream/a"));
        rig.resolver.push(Ok("https://stream/b"));

        rig.play(0).await;
        rig.play(1).await;

        rig.media_event(1, MediaEventKind::Error("old".to_string()))
            .await;
        rig.media_event(1, MediaEventKind::Position(Duration::from_secs(5)))
            .await;

        assert_eq!(rig.resolver.calls(), vec![1, 2]);
        assert_eq!(rig.session.retries(), 0);
        assert_eq!(rig.session.position(), Duration::ZERO);
        assert_eq!(rig.session.state(), PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_play_same_row_toggles() {
        let mut rig = rig();
        rig.resolver.push(Ok("https://stream/a"));

        rig.play(0).await;
        rig.play(0).await;
        assert_eq!(rig.session.state(), PlaybackState::Paused);
        rig.session.toggle().unwrap();
        assert_eq!(rig.session.state(), PlaybackState::Playing);

        assert_eq!(rig.resolver.calls(), vec![1]);
        let notices = rig.drain();
        assert_eq!(&notices[1..], &[Notice::Paused, Notice::Resumed]);
    }

    #[tokio::test]
    async fn test_previous_and_bounds() {
        let mut rig = rig();
        rig.resolver.push(Ok("https://stream/a"));

        rig.play(0).await;
        rig.session.previous().unwrap();
        assert_eq!(rig.session.current_row(), Some(0));
        assert_eq!(rig.resolver.calls(), vec![1]);

        assert!(matches!(
            rig.session.play(5),
            Err(PlaybackError::UnknownRow(5))
        ));
    }

    #[tokio::test]
    async fn test_stop_resets_everything() {
        let mut rig = rig();
        rig.resolver.push(Ok("https://stream/a"));

        rig.play(0).await;
        rig.media_event(1, MediaEventKind::Position(Duration::from_secs(12)))
            .await;
        assert_eq!(rig.session.position(), Duration::from_secs(12));

        rig.session.stop();
        assert_eq!(rig.session.state(), PlaybackState::Stopped);
        assert_eq!(rig.session.current_row(), None);
        assert_eq!(rig.session.label(), None);
        assert_eq!(rig.session.position(), Duration::ZERO);
        assert_eq!(rig.session.duration(), None);
    }

    #[tokio::test]
    async fn test_stop_during_retry_delay() {
        let mut rig = Rig::new(Duration::from_secs(3600));
        rig.resolver.push(Err("expired"));

        rig.session.play(0).unwrap();
        let first = rig.lookups.recv().await.unwrap();
        rig.session.handle_resolution(first).unwrap();

        // Waiting out the retry delay; the session still takes commands
        assert!(rig.session.is_resolving());
        assert_eq!(rig.session.retries(), 1);
        rig.session.stop();

        assert!(!rig.session.is_resolving());
        assert_eq!(rig.session.current_row(), None);
        assert_eq!(rig.resolver.calls(), vec![1]);
        let pending = tokio::time::timeout(Duration::from_millis(50), rig.lookups.recv()).await;
        assert!(pending.is_err());
        assert_eq!(
            rig.drain(),
            vec![Notice::Retrying { attempt: 1, max: 3 }, Notice::Stopped]
        );
    }

    #[tokio::test]
    async fn test_new_row_supersedes_pending_lookup() {
        let mut rig = Rig::new(Duration::from_secs(3600));
        rig.resolver.push(Err("expired"));

        rig.session.play(0).unwrap();
        let first = rig.lookups.recv().await.unwrap();
        rig.session.handle_resolution(first).unwrap();
        assert_eq!(rig.session.retries(), 1);

        // Row 1 is picked while row 0 is still waiting to retry
        rig.resolver.push(Ok("https://stream/b"));
        rig.session.play(1).unwrap();
        assert_eq!(rig.session.retries(), 0);
        rig.settle().await;

        assert_eq!(rig.session.state(), PlaybackState::Playing);
        assert_eq!(rig.session.current_row(), Some(1));
        assert_eq!(rig.resolver.calls(), vec![1, 2]);
    }
}
