//! Settings persistence
//!
//! Stores tool locations and download defaults in ~/.config/tunegrab/config.json.
//! Missing fields fall back to their defaults, so old files keep loading.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::pipeline::{Codec, PipelineOptions};
use crate::playback::SessionConfig;
use crate::tagging::TagOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// yt-dlp executable
    pub ytdlp_path: PathBuf,
    /// ffmpeg binary or directory handed to yt-dlp
    pub ffmpeg_location: Option<PathBuf>,
    /// Player used for streaming playback
    pub player_path: PathBuf,
    pub default_format: Codec,
    pub default_destination: Option<PathBuf>,
    /// Write MP3 tags as ID3v2.3 + ID3v1
    pub id3v23: bool,
    pub retry_delay_ms: u64,
    pub max_retries: u32,
    /// Shrink embedded covers to fit this many pixels per side
    pub cover_max_dimension: Option<u32>,
    /// Where per-run scratch directories are created
    pub scratch_root: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ytdlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_location: None,
            player_path: PathBuf::from("ffplay"),
            default_format: Codec::Mp3,
            default_destination: None,
            id3v23: false,
            retry_delay_ms: 1000,
            max_retries: 3,
            cover_max_dimension: None,
            scratch_root: None,
        }
    }
}

impl Settings {
    /// Load settings from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        serde_json::from_str(&contents).with_context(|| format!("Failed to parse config {:?}", path))
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("tunegrab").join("config.json"))
    }

    /// Destination when none is given: configured, then the audio dir,
    /// then the current directory
    pub fn destination(&self) -> PathBuf {
        self.default_destination
            .clone()
            .or_else(dirs::audio_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn pipeline_options(&self, id3v23: bool) -> PipelineOptions {
        PipelineOptions {
            scratch_root: self.scratch_root.clone(),
            tagging: TagOptions {
                id3v23: id3v23 || self.id3v23,
            },
            cover_max_dimension: self.cover_max_dimension,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}
