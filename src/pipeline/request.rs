//! Download requests and their validation

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::PipelineError;
use crate::catalog::AlbumMetadata;

/// Target audio codec handed to the transcoder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Mp3,
    Flac,
    Wav,
    M4a,
    Opus,
}

impl Codec {
    pub fn as_str(self) -> &'static str {
        match self {
            Codec::Mp3 => "mp3",
            Codec::Flac => "flac",
            Codec::Wav => "wav",
            Codec::M4a => "m4a",
            Codec::Opus => "opus",
        }
    }

    /// Codec of a produced media file, by extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => Some(Codec::Mp3),
            "flac" => Some(Codec::Flac),
            "wav" => Some(Codec::Wav),
            "m4a" | "mp4" => Some(Codec::M4a),
            "opus" | "ogg" => Some(Codec::Opus),
            _ => None,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pipeline run: which playlist items to fetch, where to put them, and
/// in what container. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub playlist_id: String,
    /// 1-based playlist positions, in the order the caller selected them
    pub positions: Vec<u32>,
    pub destination: PathBuf,
    pub codec: Codec,
    pub album: Option<Arc<AlbumMetadata>>,
}

impl DownloadRequest {
    /// Check the request before any work starts
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.playlist_id.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "no playlist identifier given".to_string(),
            ));
        }

        if self.positions.is_empty() {
            return Err(PipelineError::Configuration("no tracks selected".to_string()));
        }

        let mut seen = HashSet::with_capacity(self.positions.len());
        for &position in &self.positions {
            if position == 0 {
                return Err(PipelineError::Configuration(
                    "track positions are 1-based; got 0".to_string(),
                ));
            }
            if !seen.insert(position) {
                return Err(PipelineError::Configuration(format!(
                    "track {} selected more than once",
                    position
                )));
            }
        }

        if !self.destination.is_dir() {
            return Err(PipelineError::Configuration(format!(
                "destination {} is not a directory",
                self.destination.display()
            )));
        }

        // The only reliable writability check is to write something
        tempfile::NamedTempFile::new_in(&self.destination).map_err(|e| {
            PipelineError::Configuration(format!(
                "destination {} is not writable: {}",
                self.destination.display(),
                e
            ))
        })?;

        Ok(())
    }
}
