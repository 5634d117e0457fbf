//! Container-independent metadata for one file

use std::sync::Arc;

use super::cover::CoverImage;
use crate::catalog::AlbumMetadata;

/// Everything the tagging engine may write into one file
///
/// Absent fields are left alone in the file, never written empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagSet {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub track_number: Option<u32>,
    pub total_tracks: Option<u32>,
    pub year: Option<u32>,
    pub cover: Option<Arc<CoverImage>>,
}

impl TagSet {
    /// Build the tag set for the file that came from `position`.
    ///
    /// Without album metadata, or without a track at that position, only
    /// the cover is carried.
    pub fn for_position(
        album: Option<&AlbumMetadata>,
        position: Option<u32>,
        cover: Option<Arc<CoverImage>>,
    ) -> Self {
        let Some(album) = album else {
            return Self {
                cover,
                ..Default::default()
            };
        };
        let Some((position, track)) = position.and_then(|p| album.track_at(p).map(|t| (p, t)))
        else {
            return Self {
                cover,
                ..Default::default()
            };
        };

        let album_artist = album.artist_names();
        Self {
            title: non_empty(&track.title),
            artist: track.artist_names().or_else(|| album_artist.clone()),
            album: non_empty(&album.title),
            album_artist,
            track_number: Some(position),
            total_tracks: album.total_tracks(),
            year: album.year.filter(|y| *y > 0),
            cover,
        }
    }

    /// Year in its 4-digit text form
    pub fn year_text(&self) -> Option<String> {
        self.year.map(|y| format!("{:04}", y))
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
