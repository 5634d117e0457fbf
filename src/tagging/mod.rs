//! Metadata tagging engine
//!
//! Writes a [`TagSet`] and optional cover into one audio file. The
//! container is sniffed from file content, not the extension, and each
//! container class has its own handler:
//!
//! - MP3: ID3v2 frames replaced in place, one front-cover picture frame;
//!   optionally downgraded to ID3v2.3 plus a legacy ID3v1 tag
//! - FLAC: the comment block is cleared and rewritten; cover in a picture block
//! - Ogg (Vorbis, Opus, Speex): comments cleared and rewritten; cover as a
//!   `METADATA_BLOCK_PICTURE` comment
//! - MP4/M4A: fixed atoms per field, `trkn` as a (track, total) pair, `covr`
//!   marked PNG or JPEG
//!
//! Anything else is [`TagError::UnsupportedFormat`].

pub mod cover;
pub mod tagset;

use lofty::config::WriteOptions;
use lofty::file::{FileType, TaggedFile};
use lofty::picture::{Picture, PictureType};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag, TagType};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub use cover::CoverImage;
pub use tagset::TagSet;

#[derive(Debug, Error)]
pub enum TagError {
    #[error("Unsupported container: {0}")]
    UnsupportedFormat(String),

    #[error("Cover art error: {0}")]
    Cover(String),

    #[error("Failed to write tags: {0}")]
    Lofty(#[from] lofty::error::LoftyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tagging task failed: {0}")]
    Join(String),
}

/// Container classes the engine knows how to tag
#[derive(Debug, Clone, PartialEq, Eq)]
enum Container {
    Mp3,
    Flac,
    Ogg,
    Mp4,
    /// Name of what was found instead
    Unsupported(String),
}

impl Container {
    fn from_file_type(file_type: Option<FileType>) -> Self {
        match file_type {
            Some(FileType::Mpeg) => Container::Mp3,
            Some(FileType::Flac) => Container::Flac,
            Some(FileType::Vorbis | FileType::Opus | FileType::Speex) => Container::Ogg,
            Some(FileType::Mp4) => Container::Mp4,
            Some(other) => Container::Unsupported(format!("{:?}", other)),
            None => Container::Unsupported("unrecognised".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TagOptions {
    /// Write MP3 tags as ID3v2.3 plus ID3v1
    pub id3v23: bool,
}

/// Write `tags` into `path`. Running this twice with the same input leaves
/// the same tags behind.
pub fn tag_file(path: &Path, tags: &TagSet, options: TagOptions) -> Result<(), TagError> {
    let (container, probe) = sniff(path)?;
    if let Container::Unsupported(kind) = &container {
        return Err(TagError::UnsupportedFormat(kind.clone()));
    }

    if tags.is_empty() {
        debug!("Nothing to write for {}", path.display());
        return Ok(());
    }

    let mut file = probe.read()?;
    if container == Container::Flac {
        ensure_flac_padding(path)?;
    }
    let write_options = match &container {
        Container::Mp3 => write_mp3(&mut file, tags, options)?,
        Container::Flac => write_flac(&mut file, tags)?,
        Container::Ogg => write_ogg(&mut file, tags)?,
        Container::Mp4 => write_mp4(&mut file, tags)?,
        Container::Unsupported(kind) => return Err(TagError::UnsupportedFormat(kind.clone())),
    };

    file.save_to_path(path, write_options)?;
    debug!("Tagged {} ({:?})", path.display(), container);
    Ok(())
}

/// The container judged from file content, with the probe ready to read it
fn sniff(path: &Path) -> Result<(Container, Probe<BufReader<File>>), TagError> {
    let probe = Probe::new(BufReader::new(File::open(path)?)).guess_file_type()?;
    Ok((Container::from_file_type(probe.file_type()), probe))
}

/// [`tag_file`] on the blocking pool
pub async fn tag_file_blocking(
    path: PathBuf,
    tags: TagSet,
    options: TagOptions,
) -> Result<(), TagError> {
    tokio::task::spawn_blocking(move || tag_file(&path, &tags, options))
        .await
        .map_err(|e| TagError::Join(e.to_string()))?
}

fn write_mp3(
    file: &mut TaggedFile,
    tags: &TagSet,
    options: TagOptions,
) -> Result<WriteOptions, TagError> {
    let tag = tag_slot(file, TagType::Id3v2)?;
    write_fields(tag, tags);
    if let Some(cover) = &tags.cover {
        replace_pictures(tag, cover.to_picture());
    }

    if !options.id3v23 {
        return Ok(WriteOptions::default());
    }

    let mut legacy = Tag::new(TagType::Id3v1);
    if let Some(title) = &tags.title {
        legacy.set_title(title.clone());
    }
    if let Some(artist) = &tags.artist {
        legacy.set_artist(artist.clone());
    }
    if let Some(album) = &tags.album {
        legacy.set_album(album.clone());
    }
    if let Some(year) = tags.year {
        legacy.set_year(year);
    }
    if let Some(track) = tags.track_number {
        legacy.set_track(track);
    }
    file.insert_tag(legacy);

    Ok(WriteOptions::default().use_id3v23(true))
}

fn write_flac(file: &mut TaggedFile, tags: &TagSet) -> Result<WriteOptions, TagError> {
    let tag = tag_slot(file, TagType::VorbisComments)?;
    tag.clear();
    write_fields(tag, tags);
    if let Some(cover) = &tags.cover {
        // Written out as a PICTURE metadata block
        tag.push_picture(cover.to_picture());
    }
    Ok(flac_write_options())
}

/// lofty's own padding insertion indexes past the buffer when STREAMINFO is
/// the only metadata block, so padding is handled by [`ensure_flac_padding`]
fn flac_write_options() -> WriteOptions {
    WriteOptions::default().preferred_padding(0)
}

/// Size of the PADDING block given to FLAC files that have none
const FLAC_PADDING: u32 = 1024;

/// New comment blocks are spliced in right after STREAMINFO, so STREAMINFO
/// must not carry the last-block flag. If it does, clear it and append a
/// PADDING block to take over the flag.
fn ensure_flac_padding(path: &Path) -> Result<(), TagError> {
    let mut data = std::fs::read(path)?;
    if data.len() < 8 || &data[..4] != b"fLaC" || data[4] & 0x80 == 0 {
        return Ok(());
    }

    let stream_info_end = 8 + u32::from_be_bytes([0, data[5], data[6], data[7]]) as usize;
    if data.len() < stream_info_end {
        // Truncated; left for lofty to reject
        return Ok(());
    }

    data[4] &= 0x7F;
    let mut padding = vec![0u8; 4 + FLAC_PADDING as usize];
    padding[0] = 0x80 | 1;
    padding[1..4].copy_from_slice(&FLAC_PADDING.to_be_bytes()[1..]);
    data.splice(stream_info_end..stream_info_end, padding);

    std::fs::write(path, data)?;
    debug!("Added a PADDING block to {}", path.display());
    Ok(())
}

fn write_ogg(file: &mut TaggedFile, tags: &TagSet) -> Result<WriteOptions, TagError> {
    let tag = tag_slot(file, TagType::VorbisComments)?;
    tag.clear();
    write_fields(tag, tags);
    if let Some(cover) = &tags.cover {
        // lofty encodes it as a METADATA_BLOCK_PICTURE comment
        tag.push_picture(cover.to_picture());
    }
    Ok(WriteOptions::default())
}

fn write_mp4(file: &mut TaggedFile, tags: &TagSet) -> Result<WriteOptions, TagError> {
    let tag = tag_slot(file, TagType::Mp4Ilst)?;
    write_fields(tag, tags);
    if let Some(cover) = &tags.cover {
        // covr data type follows the picture's MIME type
        replace_pictures(tag, cover.to_picture());
    }
    Ok(WriteOptions::default())
}

/// The file's tag of `tag_type`, created if missing
fn tag_slot(file: &mut TaggedFile, tag_type: TagType) -> Result<&mut Tag, TagError> {
    let file_type = file.file_type();
    if file.tag(tag_type).is_none() {
        file.insert_tag(Tag::new(tag_type));
    }
    file.tag_mut(tag_type).ok_or_else(|| {
        TagError::UnsupportedFormat(format!("{:?} cannot hold {:?} tags", file_type, tag_type))
    })
}

/// Replace every present field; absent ones are left as they are
fn write_fields(tag: &mut Tag, tags: &TagSet) {
    let text = [
        (ItemKey::TrackTitle, &tags.title),
        (ItemKey::TrackArtist, &tags.artist),
        (ItemKey::AlbumTitle, &tags.album),
        (ItemKey::AlbumArtist, &tags.album_artist),
    ];
    for (key, value) in text {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            tag.insert_text(key, value.to_string());
        }
    }

    if let Some(track) = tags.track_number {
        tag.insert_text(ItemKey::TrackNumber, track.to_string());
    }
    if let Some(total) = tags.total_tracks {
        tag.insert_text(ItemKey::TrackTotal, total.to_string());
    }
    if let Some(year) = tags.year_text() {
        tag.insert_text(ItemKey::RecordingDate, year);
    }
}

fn replace_pictures(tag: &mut Tag, picture: Picture) {
    let existing: Vec<PictureType> = tag.pictures().iter().map(Picture::pic_type).collect();
    for pic_type in existing {
        tag.remove_picture_type(pic_type);
    }
    tag.push_picture(picture);
}
