//! Album and track metadata supplied by the catalog

use serde::{Deserialize, Serialize};

/// Album as presented to the user, with its ordered track list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlbumMetadata {
    pub title: String,
    #[serde(default)]
    pub artists: Vec<String>,
    pub year: Option<u32>,
    /// Track count declared by the catalog (may differ from `tracks.len()`)
    #[serde(rename = "trackCount", alias = "track_count")]
    pub track_count: Option<u32>,
    #[serde(default)]
    pub tracks: Vec<TrackMetadata>,
}

/// One entry of an album's track list
///
/// Its 1-based position in `AlbumMetadata::tracks` is the playlist position
/// used to fetch it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    #[serde(default)]
    pub artists: Vec<String>,
    /// Duration in seconds
    #[serde(alias = "duration_seconds")]
    pub duration: Option<u32>,
}

impl AlbumMetadata {
    /// Track at a 1-based playlist position
    pub fn track_at(&self, position: u32) -> Option<&TrackMetadata> {
        let index = usize::try_from(position).ok()?.checked_sub(1)?;
        self.tracks.get(index)
    }

    /// Declared track count, falling back to the listed tracks
    pub fn total_tracks(&self) -> Option<u32> {
        self.track_count
            .or_else(|| u32::try_from(self.tracks.len()).ok())
            .filter(|count| *count > 0)
    }

    pub fn artist_names(&self) -> Option<String> {
        join_names(&self.artists)
    }
}

impl TrackMetadata {
    pub fn artist_names(&self) -> Option<String> {
        join_names(&self.artists)
    }

    /// `mm:ss`, or `--:--` when the catalog has no duration
    pub fn duration_display(&self) -> String {
        match self.duration {
            Some(secs) => format!("{:02}:{:02}", secs / 60, secs % 60),
            None => "--:--".to_string(),
        }
    }

    /// Two-line display label used by the player
    pub fn display_label(&self) -> String {
        match self.artist_names() {
            Some(artists) => format!("{} — {}", self.title, artists),
            None => self.title.clone(),
        }
    }
}

fn join_names(names: &[String]) -> Option<String> {
    let names: Vec<&str> = names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn album() -> AlbumMetadata {
        AlbumMetadata {
            title: "X".to_string(),
            artists: vec!["Band".to_string()],
            year: Some(1999),
            track_count: None,
            tracks: vec![
                TrackMetadata {
                    title: "A".to_string(),
                    artists: vec!["Band".to_string(), "Guest".to_string()],
                    duration: Some(185),
                },
                TrackMetadata {
                    title: "B".to_string(),
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn test_track_at_is_one_based() {
        let album = album();
        assert_eq!(album.track_at(1).map(|t| t.title.as_str()), Some("A"));
        assert_eq!(album.track_at(2).map(|t| t.title.as_str()), Some("B"));
        assert!(album.track_at(0).is_none());
        assert!(album.track_at(3).is_none());
    }

    #[test]
    fn test_total_tracks_prefers_declared_count() {
        let mut album = album();
        assert_eq!(album.total_tracks(), Some(2));
        album.track_count = Some(12);
        assert_eq!(album.total_tracks(), Some(12));
    }

    #[test]
    fn test_artist_names_joined() {
        let album = album();
        assert_eq!(album.tracks[0].artist_names().as_deref(), Some("Band, Guest"));
        assert_eq!(album.tracks[1].artist_names(), None);
    }

    #[test]
    fn test_duration_display() {
        let album = album();
        assert_eq!(album.tracks[0].duration_display(), "03:05");
        assert_eq!(album.tracks[1].duration_display(), "--:--");
    }

    #[test]
    fn test_parse_album_json() {
        let json = r#"{
            "title": "X",
            "artists": ["Band"],
            "year": 2001,
            "trackCount": 2,
            "tracks": [{"title": "A", "duration": 60}, {"title": "B"}]
        }"#;
        let parsed: AlbumMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.track_count, Some(2));
        assert_eq!(parsed.tracks.len(), 2);
        assert!(parsed.tracks[1].artists.is_empty());
    }
}
