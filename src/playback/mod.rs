//! Streaming playback of single playlist items
//!
//! A [`PlaybackSession`] resolves one track to a transient stream URL on a
//! background task, hands it to a [`MediaBackend`], and retries a bounded
//! number of times when resolution or playback fails. Backend events come back as
//! [`MediaEvent`]s tagged with the generation of the stream that produced
//! them, so events from an interrupted stream can be told apart.

pub mod player;
pub mod session;

use std::time::Duration;
use thiserror::Error;

use crate::acquisition::AcquisitionError;

pub use player::ExternalPlayer;
pub use session::{PlaybackSession, SessionConfig};

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Failed to resolve stream: {0}")]
    Resolve(#[from] AcquisitionError),

    #[error("Player error: {0}")]
    Backend(String),

    #[error("No playlist loaded")]
    NoPlaylist,

    #[error("Row {0} is not in the track list")]
    UnknownRow(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaEvent {
    /// Stream this event belongs to, as returned by [`MediaBackend::start`]
    pub generation: u64,
    pub kind: MediaEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaEventKind {
    EndOfMedia,
    Error(String),
    /// Elapsed playback time
    Position(Duration),
}

/// Audio output for resolved streams
pub trait MediaBackend: Send {
    /// Start playing `url`, replacing whatever was playing
    ///
    /// Returns the generation number later carried by this stream's events.
    fn start(&mut self, url: &str) -> Result<u64, PlaybackError>;

    fn pause(&mut self) -> Result<(), PlaybackError>;

    fn resume(&mut self) -> Result<(), PlaybackError>;

    /// Stop the current stream; no further events are sent for it
    fn stop(&mut self);
}

/// User-visible session changes, sent to the shell
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Playing { row: usize, label: String },
    Paused,
    Resumed,
    Retrying { attempt: u32, max: u32 },
    Failed { reason: String },
    Stopped,
    EndOfList,
}
