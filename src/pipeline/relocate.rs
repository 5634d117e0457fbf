//! Copy finished files into the destination without clobbering anything

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::utils::sanitize_filename;

/// Give up after this many numbered candidates
const MAX_SUFFIX: u32 = 10_000;

/// Copy `source` into `dir`, picking "Name (n).ext" when "Name.ext" exists.
///
/// The target is opened with create-new semantics, so an existing file is
/// never truncated even if another process creates it concurrently.
/// The source is left in place.
pub fn relocate(source: &Path, dir: &Path) -> io::Result<PathBuf> {
    let stem = source
        .file_stem()
        .map(|s| sanitize_filename(&s.to_string_lossy()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "track".to_string());
    let ext = source
        .extension()
        .map(|e| e.to_string_lossy().into_owned());

    let mut reader = File::open(source)?;

    for n in 0..=MAX_SUFFIX {
        let candidate = dir.join(numbered_name(&stem, ext.as_deref(), n));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut target) => {
                if let Err(e) = io::copy(&mut reader, &mut target) {
                    drop(target);
                    let _ = std::fs::remove_file(&candidate);
                    return Err(e);
                }
                target.sync_all()?;
                debug!("Relocated {} -> {}", source.display(), candidate.display());
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free file name for {} in {}", stem, dir.display()),
    ))
}

/// "Name.ext" for 0, "Name (n).ext" otherwise
fn numbered_name(stem: &str, ext: Option<&str>, n: u32) -> String {
    let base = if n == 0 {
        stem.to_string()
    } else {
        format!("{} ({})", stem, n)
    };
    match ext {
        Some(ext) if !ext.is_empty() => format!("{}.{}", base, ext),
        _ => base,
    }
}
