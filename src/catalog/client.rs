//! Album metadata lookup
//!
//! The catalog is an outside collaborator: it only has to hand the pipeline
//! an [`AlbumMetadata`]. Two sources exist: yt-dlp's flat playlist dump and
//! a user-supplied JSON file.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use super::models::{AlbumMetadata, TrackMetadata};
use crate::acquisition::playlist_url;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Playlist lookup failed: {0}")]
    Lookup(String),

    #[error("Failed to read album metadata: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse album metadata: {0}")]
    Json(#[from] serde_json::Error),
}

/// Source of album metadata for a playlist
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn album(&self, playlist_id: &str) -> Result<AlbumMetadata, CatalogError>;
}

/// Catalog backed by `yt-dlp --flat-playlist -J`
#[derive(Debug, Clone)]
pub struct PlaylistCatalog {
    ytdlp_path: PathBuf,
}

impl PlaylistCatalog {
    pub fn new(ytdlp_path: impl Into<PathBuf>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
        }
    }
}

#[async_trait]
impl Catalog for PlaylistCatalog {
    async fn album(&self, playlist_id: &str) -> Result<AlbumMetadata, CatalogError> {
        let url = playlist_url(playlist_id);
        debug!("Fetching playlist metadata: {}", url);

        let output = Command::new(&self.ytdlp_path)
            .args(["--flat-playlist", "-J", "--no-warnings"])
            .arg(&url)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| CatalogError::Spawn {
                program: self.ytdlp_path.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CatalogError::Lookup(format!(
                "{} exited with {}: {}",
                self.ytdlp_path.display(),
                output.status,
                stderr.trim()
            )));
        }

        let playlist: FlatPlaylist = serde_json::from_slice(&output.stdout)?;
        let album = playlist.into_album();
        debug!("Playlist '{}' has {} tracks", album.title, album.tracks.len());
        Ok(album)
    }
}

/// Catalog that always answers with metadata loaded from a JSON file
#[derive(Debug, Clone)]
pub struct FileCatalog {
    album: AlbumMetadata,
}

impl FileCatalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        let album = serde_json::from_str(&contents)?;
        Ok(Self { album })
    }
}

#[async_trait]
impl Catalog for FileCatalog {
    async fn album(&self, _playlist_id: &str) -> Result<AlbumMetadata, CatalogError> {
        Ok(self.album.clone())
    }
}

// yt-dlp flat playlist dump (-J with --flat-playlist)
#[derive(Debug, Deserialize)]
struct FlatPlaylist {
    title: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    release_year: Option<u32>,
    #[serde(default)]
    entries: Vec<FlatEntry>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    title: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    #[serde(default)]
    artists: Vec<String>,
    duration: Option<f64>,
}

impl FlatPlaylist {
    fn into_album(self) -> AlbumMetadata {
        let title = self
            .title
            .map(|t| t.strip_prefix("Album - ").map(str::to_string).unwrap_or(t))
            .unwrap_or_default();

        let album_artist = self.channel.or(self.uploader).map(|c| strip_topic(&c));

        let tracks: Vec<TrackMetadata> = self
            .entries
            .into_iter()
            .map(|entry| {
                let artists = if entry.artists.is_empty() {
                    entry
                        .channel
                        .or(entry.uploader)
                        .map(|c| vec![strip_topic(&c)])
                        .unwrap_or_default()
                } else {
                    entry.artists
                };
                TrackMetadata {
                    title: entry.title.unwrap_or_default(),
                    artists,
                    duration: entry
                        .duration
                        .filter(|d| d.is_finite() && *d >= 0.0)
                        .map(|d| d.round() as u32),
                }
            })
            .collect();

        AlbumMetadata {
            title,
            artists: album_artist
                .or_else(|| tracks.first().and_then(|t| t.artists.first().cloned()))
                .into_iter()
                .collect(),
            year: self.release_year,
            track_count: u32::try_from(tracks.len()).ok(),
            tracks,
        }
    }
}

/// Auto-generated YouTube artist channels are named "<Artist> - Topic"
fn strip_topic(channel: &str) -> String {
    channel
        .strip_suffix(" - Topic")
        .unwrap_or(channel)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_playlist_into_album() {
        let json = r#"{
            "title": "Album - Midnight Drive",
            "channel": "The Band - Topic",
            "entries": [
                {"title": "Intro", "channel": "The Band - Topic", "duration": 61.4},
                {"title": "Outro", "artists": ["The Band", "Guest"], "duration": null}
            ]
        }"#;
        let playlist: FlatPlaylist = serde_json::from_str(json).unwrap();
        let album = playlist.into_album();

        assert_eq!(album.title, "Midnight Drive");
        assert_eq!(album.artists, vec!["The Band".to_string()]);
        assert_eq!(album.track_count, Some(2));
        assert_eq!(album.tracks[0].artists, vec!["The Band".to_string()]);
        assert_eq!(album.tracks[0].duration, Some(61));
        assert_eq!(album.tracks[1].artists.len(), 2);
        assert_eq!(album.tracks[1].duration, None);
    }

    #[test]
    fn test_strip_topic() {
        assert_eq!(strip_topic("Someone - Topic"), "Someone");
        assert_eq!(strip_topic("Someone"), "Someone");
    }

    #[tokio::test]
    async fn test_file_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("album.json");
        std::fs::write(&path, r#"{"title": "X", "tracks": [{"title": "A"}]}"#).unwrap();

        let catalog = FileCatalog::load(&path).unwrap();
        let album = catalog.album("ignored").await.unwrap();
        assert_eq!(album.title, "X");
        assert_eq!(album.tracks.len(), 1);
    }
}
