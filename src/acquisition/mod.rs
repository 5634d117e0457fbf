//! Acquisition tool seam
//!
//! The network fetch and audio transcode are done by an external tool. The
//! pipeline only sees this module's types: a job describing what to fetch,
//! an ordered stream of [`ToolEvent`]s pushed into a callback, and the list
//! of files the tool placed in the scratch area.

pub mod ytdlp;

use async_trait::async_trait;
use std::ops::ControlFlow;
use std::path::PathBuf;
use thiserror::Error;
use url::form_urlencoded;

use crate::pipeline::Codec;

pub use ytdlp::YtDlp;

const PLAYLIST_BASE: &str = "https://music.youtube.com/playlist";

/// Build the playlist locator for a playlist id
pub fn playlist_url(playlist_id: &str) -> String {
    let list: String = form_urlencoded::byte_serialize(playlist_id.as_bytes()).collect();
    format!("{}?list={}", PLAYLIST_BASE, list)
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Unexpected tool output: {0}")]
    Protocol(String),

    #[error("I/O error while talking to the tool: {0}")]
    Io(#[from] std::io::Error),
}

impl AcquisitionError {
    /// Captured tool diagnostics, if any
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            Self::ToolFailed { stderr, .. } if !stderr.trim().is_empty() => Some(stderr),
            _ => None,
        }
    }
}

/// One run of the tool over a set of playlist positions
#[derive(Debug, Clone)]
pub struct AcquisitionJob {
    pub playlist_id: String,
    /// 1-based playlist positions, in request order
    pub positions: Vec<u32>,
    pub codec: Codec,
    /// Private directory the tool writes into
    pub scratch: PathBuf,
}

impl AcquisitionJob {
    /// Ordered, comma-joined position list ("1,2,5")
    pub fn items_token(&self) -> String {
        self.positions
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Display hints the tool attaches to an event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemHint {
    pub position: Option<u32>,
    pub artist: Option<String>,
    pub title: Option<String>,
}

impl ItemHint {
    /// "Artist - Title", or whichever half is known
    pub fn display_name(&self) -> Option<String> {
        match (&self.artist, &self.title) {
            (Some(artist), Some(title)) => Some(format!("{} - {}", artist, title)),
            (None, Some(title)) => Some(title.clone()),
            (Some(artist), None) => Some(artist.clone()),
            (None, None) => None,
        }
    }
}

/// Progress event emitted by the tool, in item order
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEvent {
    Downloading {
        downloaded_bytes: Option<u64>,
        total_bytes: Option<u64>,
        item: ItemHint,
    },
    Finished {
        item: ItemHint,
    },
}

/// A finished media file and the playlist position it came from
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedFile {
    pub position: Option<u32>,
    pub path: PathBuf,
}

/// How a tool run ended when it did not fail
#[derive(Debug)]
pub enum ToolRun {
    Completed { placed: Vec<PlacedFile> },
    /// The event callback asked to stop
    Interrupted,
}

/// Fetches and transcodes playlist items into a scratch directory
#[async_trait]
pub trait AcquisitionTool: Send + Sync {
    /// Run the tool for `job`, pushing every progress event into `on_event`.
    ///
    /// Returning `ControlFlow::Break` from the callback stops the tool and
    /// yields [`ToolRun::Interrupted`].
    async fn acquire(
        &self,
        job: &AcquisitionJob,
        on_event: &mut (dyn FnMut(ToolEvent) -> ControlFlow<()> + Send),
    ) -> Result<ToolRun, AcquisitionError>;
}

/// Resolves a single playlist item to a transient stream URL
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve_stream(&self, playlist_id: &str, position: u32)
    -> Result<String, AcquisitionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playlist_url_escapes_id() {
        let url = url::Url::parse(&playlist_url("OLAK5uy_abc&x=1")).unwrap();
        assert_eq!(url.host_str(), Some("music.youtube.com"));
        let (key, value) = url.query_pairs().next().unwrap();
        assert_eq!(key, "list");
        assert_eq!(value, "OLAK5uy_abc&x=1");
    }

    #[test]
    fn test_items_token_keeps_order() {
        let job = AcquisitionJob {
            playlist_id: "PL".to_string(),
            positions: vec![3, 1, 2],
            codec: Codec::Mp3,
            scratch: PathBuf::from("/tmp"),
        };
        assert_eq!(job.items_token(), "3,1,2");
    }

    #[test]
    fn test_item_hint_display_name() {
        let hint = ItemHint {
            position: Some(1),
            artist: Some("Band".to_string()),
            title: Some("Song".to_string()),
        };
        assert_eq!(hint.display_name().as_deref(), Some("Band - Song"));
        assert_eq!(ItemHint::default().display_name(), None);
    }
}
