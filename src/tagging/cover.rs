//! Cover art loading and optional downscaling
//!
//! The tool writes one shared playlist thumbnail into the scratch area.
//! It is loaded once per run and embedded into every file.
//! When a maximum dimension is configured the image is shrunk and
//! re-encoded as baseline JPEG for players with small decoders:
//! - fit within the configured box, aspect ratio kept
//! - JPEG quality stepped down until under 200KB

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use lofty::picture::{MimeType, Picture, PictureType};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

use super::TagError;

/// Starting JPEG quality for re-encoded covers
const JPEG_QUALITY: u8 = 75;

/// Quality floor; below this the cover is kept even if oversized
const MIN_JPEG_QUALITY: u8 = 50;

/// Maximum size for a re-encoded cover in bytes (200KB)
const MAX_COVER_BYTES: usize = 200 * 1024;

/// Description stored alongside embedded pictures
const COVER_DESCRIPTION: &str = "Cover";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverFormat {
    Jpeg,
    Png,
}

impl CoverFormat {
    /// PNG when the content or the file name says so, JPEG otherwise
    pub fn detect(data: &[u8], path: Option<&Path>) -> Self {
        let png_name = path
            .and_then(|p| p.extension())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if png_name || matches!(image::guess_format(data), Ok(ImageFormat::Png)) {
            CoverFormat::Png
        } else {
            CoverFormat::Jpeg
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            CoverFormat::Jpeg => "image/jpeg",
            CoverFormat::Png => "image/png",
        }
    }

    fn lofty_mime(self) -> MimeType {
        match self {
            CoverFormat::Jpeg => MimeType::Jpeg,
            CoverFormat::Png => MimeType::Png,
        }
    }
}

/// A decoded-and-validated cover image
#[derive(Debug, Clone, PartialEq)]
pub struct CoverImage {
    pub data: Vec<u8>,
    pub format: CoverFormat,
    pub width: u32,
    pub height: u32,
    /// Bits per pixel
    pub depth: u32,
}

impl CoverImage {
    pub fn load(path: &Path) -> Result<Self, TagError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(data, Some(path))
    }

    pub fn from_bytes(data: Vec<u8>, path: Option<&Path>) -> Result<Self, TagError> {
        let format = CoverFormat::detect(&data, path);
        let img = decode(&data)?;
        Ok(Self {
            format,
            width: img.width(),
            height: img.height(),
            depth: u32::from(img.color().bits_per_pixel()),
            data,
        })
    }

    /// Shrink to fit within `max_dimension` and re-encode as JPEG
    ///
    /// Images already within bounds are returned unchanged.
    pub fn downscaled(self, max_dimension: u32) -> Result<Self, TagError> {
        if self.width <= max_dimension && self.height <= max_dimension {
            return Ok(self);
        }

        let img = resize_to_fit(decode(&self.data)?, max_dimension);
        // JPEG has no alpha channel
        let img = img.to_rgb8();

        let mut quality = JPEG_QUALITY;
        loop {
            let mut output = Vec::new();
            let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);
            encoder
                .encode_image(&img)
                .map_err(|e| TagError::Cover(format!("failed to encode cover as JPEG: {}", e)))?;

            if output.len() <= MAX_COVER_BYTES || quality <= MIN_JPEG_QUALITY {
                debug!(
                    "Processed cover art: {}x{} -> {} bytes (quality {})",
                    img.width(),
                    img.height(),
                    output.len(),
                    quality
                );
                return Ok(Self {
                    data: output,
                    format: CoverFormat::Jpeg,
                    width: img.width(),
                    height: img.height(),
                    depth: 24,
                });
            }

            warn!(
                "Cover art too large ({} bytes), reducing quality from {} to {}",
                output.len(),
                quality,
                quality - 10
            );
            quality -= 10;
        }
    }

    /// Front-cover picture for lofty
    pub fn to_picture(&self) -> Picture {
        Picture::new_unchecked(
            PictureType::CoverFront,
            Some(self.format.lofty_mime()),
            Some(COVER_DESCRIPTION.to_string()),
            self.data.clone(),
        )
    }
}

fn decode(data: &[u8]) -> Result<DynamicImage, TagError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| TagError::Cover(format!("failed to guess image format: {}", e)))?
        .decode()
        .map_err(|e| TagError::Cover(format!("failed to decode cover art: {}", e)))
}

/// Resize image to fit within a square box while maintaining aspect ratio
fn resize_to_fit(img: DynamicImage, max: u32) -> DynamicImage {
    let (width, height) = (img.width(), img.height());

    if width <= max && height <= max {
        return img;
    }

    let (new_width, new_height) = if width > height {
        let ratio = max as f64 / width as f64;
        (max, ((height as f64 * ratio) as u32).max(1))
    } else {
        let ratio = max as f64 / height as f64;
        (((width as f64 * ratio) as u32).max(1), max)
    };

    debug!(
        "Resizing cover art: {}x{} -> {}x{}",
        width, height, new_width, new_height
    );

    img.resize(new_width, new_height, FilterType::Lanczos3)
}
