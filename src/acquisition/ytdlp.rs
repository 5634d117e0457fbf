//! yt-dlp driver
//!
//! yt-dlp is told to print two kinds of machine-readable records on stdout,
//! one per line, fields separated by tabs:
//!
//! - `tunegrab-progress  status  downloaded  total  estimate  index  artist  track`
//!   from `--progress-template`, once per progress hook call
//! - `tunegrab-file  index  path` from `--print after_move:`, once per
//!   finished media file
//!
//! Missing template fields render as `NA`.

use async_trait::async_trait;
use std::ffi::OsString;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{
    AcquisitionError, AcquisitionJob, AcquisitionTool, ItemHint, PlacedFile, StreamResolver,
    ToolEvent, ToolRun, playlist_url,
};

const PROGRESS_MARKER: &str = "tunegrab-progress";
const FILE_MARKER: &str = "tunegrab-file";

/// Output name for media files inside the scratch area
const MEDIA_TEMPLATE: &str = "%(artist)s - %(track)s.%(ext)s";

/// Shared playlist thumbnail, written once per run
pub const COVER_STEM: &str = "cover";

/// External yt-dlp process
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    ffmpeg_location: Option<PathBuf>,
}

/// A parsed stdout line
#[derive(Debug, Clone, PartialEq)]
enum ToolLine {
    Event(ToolEvent),
    Placed(PlacedFile),
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ffmpeg_location: None,
        }
    }

    pub fn with_ffmpeg_location(mut self, location: Option<PathBuf>) -> Self {
        self.ffmpeg_location = location;
        self
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Arguments for a download + transcode run
    fn download_args(&self, job: &AcquisitionJob) -> Vec<OsString> {
        let media_output = job.scratch.join(MEDIA_TEMPLATE);
        let cover_output = job.scratch.join(COVER_STEM);

        let mut args: Vec<OsString> = vec![
            "-f".into(),
            "bestaudio/best".into(),
            "--extract-audio".into(),
            "--audio-format".into(),
            job.codec.as_str().into(),
            "--audio-quality".into(),
            "0".into(),
            "--embed-metadata".into(),
            "--write-thumbnail".into(),
            "--convert-thumbnails".into(),
            "jpg".into(),
            "--playlist-items".into(),
            job.items_token().into(),
            "-o".into(),
            media_output.into_os_string(),
            "-o".into(),
            "thumbnail:".into(),
            "-o".into(),
            prefixed("pl_thumbnail:", &cover_output),
            "--newline".into(),
            "--progress".into(),
            "--progress-template".into(),
            format!(
                "download:{}\t%(progress.status)s\t%(progress.downloaded_bytes)s\t\
                 %(progress.total_bytes)s\t%(progress.total_bytes_estimate)s\t\
                 %(info.playlist_index)s\t%(info.artist)s\t%(info.track)s",
                PROGRESS_MARKER
            )
            .into(),
            "--print".into(),
            format!("after_move:{}\t%(playlist_index)s\t%(filepath)s", FILE_MARKER).into(),
        ];

        if let Some(location) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(location.clone().into_os_string());
        }

        args.push(playlist_url(&job.playlist_id).into());
        args
    }
}

#[async_trait]
impl AcquisitionTool for YtDlp {
    async fn acquire(
        &self,
        job: &AcquisitionJob,
        on_event: &mut (dyn FnMut(ToolEvent) -> ControlFlow<()> + Send),
    ) -> Result<ToolRun, AcquisitionError> {
        info!(
            "Running {} for items {} of {}",
            self.program_name(),
            job.items_token(),
            job.playlist_id
        );

        let mut child = Command::new(&self.program)
            .args(self.download_args(job))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AcquisitionError::Spawn {
                program: self.program_name(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AcquisitionError::Protocol("stdout was not captured".to_string()))?;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(drain(stderr));

        let mut lines = BufReader::new(stdout).lines();
        let mut placed = Vec::new();

        while let Some(line) = lines.next_line().await? {
            match parse_line(&line) {
                Some(ToolLine::Event(event)) => {
                    if on_event(event).is_break() {
                        info!("Stopping {} at a checkpoint", self.program_name());
                        if let Err(e) = child.kill().await {
                            warn!("Failed to stop {}: {}", self.program_name(), e);
                        }
                        stderr_task.abort();
                        return Ok(ToolRun::Interrupted);
                    }
                }
                Some(ToolLine::Placed(file)) => {
                    debug!("Tool placed {} (item {:?})", file.path.display(), file.position);
                    placed.push(file);
                }
                None => debug!("yt-dlp: {}", line),
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(AcquisitionError::ToolFailed {
                program: self.program_name(),
                status: status.to_string(),
                stderr,
            });
        }

        Ok(ToolRun::Completed { placed })
    }
}

#[async_trait]
impl StreamResolver for YtDlp {
    async fn resolve_stream(
        &self,
        playlist_id: &str,
        position: u32,
    ) -> Result<String, AcquisitionError> {
        debug!("Resolving stream URL for item {} of {}", position, playlist_id);

        let output = Command::new(&self.program)
            .args(["-f", "bestaudio[ext=m4a]/bestaudio/best", "--no-warnings"])
            .arg("--playlist-items")
            .arg(position.to_string())
            .arg("--get-url")
            .arg(playlist_url(playlist_id))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| AcquisitionError::Spawn {
                program: self.program_name(),
                source,
            })?;

        if !output.status.success() {
            return Err(AcquisitionError::ToolFailed {
                program: self.program_name(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AcquisitionError::Protocol("track not found in playlist".to_string()))
    }
}

/// Read a child's pipe to the end, lossily
pub(crate) async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        debug!("Failed to drain child output: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn prefixed(prefix: &str, path: &Path) -> OsString {
    let mut value = OsString::from(prefix);
    value.push(path.as_os_str());
    value
}

fn parse_line(line: &str) -> Option<ToolLine> {
    let mut fields = line.trim_end_matches(['\r', '\n']).split('\t');
    match fields.next()? {
        PROGRESS_MARKER => {
            let status = fields.next()?;
            let downloaded = fields.next().and_then(parse_bytes);
            let total = fields.next().and_then(parse_bytes);
            let estimate = fields.next().and_then(parse_bytes);
            let item = ItemHint {
                position: fields.next().and_then(parse_field).and_then(|p| p.parse().ok()),
                artist: fields.next().and_then(parse_field).map(str::to_string),
                title: fields.next().and_then(parse_field).map(str::to_string),
            };
            match status {
                "downloading" => Some(ToolLine::Event(ToolEvent::Downloading {
                    downloaded_bytes: downloaded,
                    total_bytes: total.or(estimate),
                    item,
                })),
                "finished" => Some(ToolLine::Event(ToolEvent::Finished { item })),
                _ => None,
            }
        }
        FILE_MARKER => {
            let position = fields.next().and_then(parse_field).and_then(|p| p.parse().ok());
            // Paths may contain tabs; everything after the index is the path
            let path: Vec<&str> = fields.collect();
            let path = path.join("\t");
            if path.is_empty() || path == "NA" {
                return None;
            }
            Some(ToolLine::Placed(PlacedFile {
                position,
                path: PathBuf::from(path),
            }))
        }
        _ => None,
    }
}

fn parse_field(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    match raw {
        "" | "NA" | "None" => None,
        value => Some(value),
    }
}

fn parse_bytes(raw: &str) -> Option<u64> {
    let raw = parse_field(raw)?;
    raw.parse::<u64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Codec;

    fn job() -> AcquisitionJob {
        AcquisitionJob {
            playlist_id: "OLAK5uy_test".to_string(),
            positions: vec![1, 4],
            codec: Codec::Flac,
            scratch: PathBuf::from("/scratch"),
        }
    }

    #[test]
    fn test_parse_downloading_line() {
        let line = "tunegrab-progress\tdownloading\t1024\t4096\tNA\t2\tThe Band\tSong";
        let parsed = parse_line(line).unwrap();
        assert_eq!(
            parsed,
            ToolLine::Event(ToolEvent::Downloading {
                downloaded_bytes: Some(1024),
                total_bytes: Some(4096),
                item: ItemHint {
                    position: Some(2),
                    artist: Some("The Band".to_string()),
                    title: Some("Song".to_string()),
                },
            })
        );
    }

    #[test]
    fn test_parse_downloading_falls_back_to_estimate() {
        let line = "tunegrab-progress\tdownloading\t10\tNA\t2000.5\tNA\tNA\tNA";
        match parse_line(line) {
            Some(ToolLine::Event(ToolEvent::Downloading {
                total_bytes, item, ..
            })) => {
                assert_eq!(total_bytes, Some(2000));
                assert_eq!(item, ItemHint::default());
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_sizes() {
        let line = "tunegrab-progress\tdownloading\tNA\tNA\tNA\t1\tNA\tNA";
        match parse_line(line) {
            Some(ToolLine::Event(ToolEvent::Downloading {
                downloaded_bytes,
                total_bytes,
                ..
            })) => {
                assert_eq!(downloaded_bytes, None);
                assert_eq!(total_bytes, None);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_parse_finished_line() {
        let line = "tunegrab-progress\tfinished\t4096\t4096\tNA\t1\tNA\tIntro";
        assert_eq!(
            parse_line(line),
            Some(ToolLine::Event(ToolEvent::Finished {
                item: ItemHint {
                    position: Some(1),
                    artist: None,
                    title: Some("Intro".to_string()),
                }
            }))
        );
    }

    #[test]
    fn test_parse_file_line() {
        let line = "tunegrab-file\t4\t/scratch/Band - Song.flac";
        assert_eq!(
            parse_line(line),
            Some(ToolLine::Placed(PlacedFile {
                position: Some(4),
                path: PathBuf::from("/scratch/Band - Song.flac"),
            }))
        );
    }

    #[test]
    fn test_ignores_other_output() {
        assert_eq!(parse_line("[youtube:tab] Downloading webpage"), None);
        assert_eq!(parse_line("tunegrab-progress\terror\tNA\tNA\tNA\t1\tNA\tNA"), None);
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn test_download_args() {
        let tool = YtDlp::new("yt-dlp").with_ffmpeg_location(Some(PathBuf::from("/opt/ffmpeg")));
        let args: Vec<String> = tool
            .download_args(&job())
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let after = |flag: &str| {
            let idx = args.iter().position(|a| a == flag).unwrap();
            args[idx + 1].clone()
        };

        assert_eq!(after("--audio-format"), "flac");
        assert_eq!(after("--playlist-items"), "1,4");
        assert_eq!(after("--ffmpeg-location"), "/opt/ffmpeg");
        assert!(args.contains(&"pl_thumbnail:/scratch/cover".to_string()));
        assert!(args.contains(&"/scratch/%(artist)s - %(track)s.%(ext)s".to_string()));
        assert_eq!(
            args.last().map(String::as_str),
            Some("https://music.youtube.com/playlist?list=OLAK5uy_test")
        );
    }
}
