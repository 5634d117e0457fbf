//! Drives one download request from validation to delivered files

use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::progress::ProgressState;
use super::relocate::relocate;
use super::{CancellationToken, Codec, DownloadRequest, PipelineError};
use crate::acquisition::ytdlp::COVER_STEM;
use crate::acquisition::{AcquisitionJob, AcquisitionTool, PlacedFile, ToolEvent, ToolRun};
use crate::tagging::{self, CoverImage, TagError, TagOptions, TagSet};

/// Extensions the shared cover may have, in order of preference
const COVER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Parent of the per-run scratch directory (system temp dir if unset)
    pub scratch_root: Option<PathBuf>,
    pub tagging: TagOptions,
    /// Downscale covers larger than this before embedding
    pub cover_max_dimension: Option<u32>,
}

/// Files delivered by a successful run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delivery {
    pub delivered: usize,
    pub files: Vec<PathBuf>,
    /// Per-file tagging problems; those files were delivered untagged
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Delivery),
    Cancelled,
    Failed { summary: String, detail: String },
}

impl Outcome {
    fn failed(err: PipelineError) -> Self {
        let summary = err.summary().to_string();
        let tool_output = match &err {
            PipelineError::Acquisition(e) => e.tool_output().map(str::to_string),
            _ => None,
        };
        let delivered = match &err {
            PipelineError::Delivery { delivered, .. } => delivered.clone(),
            _ => Vec::new(),
        };
        let mut detail = format!("{:?}", anyhow::Error::from(err));
        if let Some(output) = tool_output {
            detail.push_str("\n\nTool output:\n");
            detail.push_str(output.trim_end());
        }
        if !delivered.is_empty() {
            detail.push_str("\n\nAlready in the destination:");
            for path in &delivered {
                detail.push_str(&format!("\n{}", path.display()));
            }
        }
        Outcome::Failed { summary, detail }
    }
}

/// Notifications from a running pipeline, in order
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Progress { percent: u8, label: String },
    Finished(Outcome),
}

pub struct DownloadPipeline<T> {
    tool: Arc<T>,
    options: PipelineOptions,
}

impl<T: AcquisitionTool + 'static> DownloadPipeline<T> {
    pub fn new(tool: Arc<T>, options: PipelineOptions) -> Self {
        Self { tool, options }
    }

    /// Run `request` on a worker task
    ///
    /// Events arrive on the returned receiver; the handle resolves to the
    /// same outcome carried by the final [`PipelineEvent::Finished`].
    pub fn spawn(
        self: Arc<Self>,
        request: DownloadRequest,
        cancel: CancellationToken,
    ) -> (JoinHandle<Outcome>, UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move { self.run(request, cancel, &tx).await });
        (handle, rx)
    }

    pub async fn run(
        &self,
        request: DownloadRequest,
        cancel: CancellationToken,
        events: &UnboundedSender<PipelineEvent>,
    ) -> Outcome {
        let outcome = match self.execute(&request, &cancel, events).await {
            Ok(Some(delivery)) => {
                info!("Delivered {} track(s)", delivery.delivered);
                Outcome::Success(delivery)
            }
            Ok(None) => {
                info!("Download cancelled");
                Outcome::Cancelled
            }
            Err(e) if cancel.is_cancelled() => {
                debug!("Ignoring failure after cancellation: {}", e);
                Outcome::Cancelled
            }
            Err(e) => {
                error!("Download failed: {}", e);
                Outcome::failed(e)
            }
        };

        // The receiver may be gone; the outcome is still returned
        let _ = events.send(PipelineEvent::Finished(outcome.clone()));
        outcome
    }

    /// `Ok(None)` means the run was cancelled
    async fn execute(
        &self,
        request: &DownloadRequest,
        cancel: &CancellationToken,
        events: &UnboundedSender<PipelineEvent>,
    ) -> Result<Option<Delivery>, PipelineError> {
        request.validate()?;

        let scratch = self.scratch_dir()?;
        debug!("Scratch area: {}", scratch.path().display());

        let job = AcquisitionJob {
            playlist_id: request.playlist_id.clone(),
            positions: request.positions.clone(),
            codec: request.codec,
            scratch: scratch.path().to_path_buf(),
        };

        let mut progress = ProgressState::new(request.positions.len() as u32);
        emit(events, &progress);

        let run = {
            let mut on_event = |event: ToolEvent| {
                if cancel.is_cancelled() {
                    return ControlFlow::Break(());
                }
                let next = progress.apply(&event);
                if next != progress {
                    emit(events, &next);
                    progress = next;
                }
                ControlFlow::Continue(())
            };
            self.tool.acquire(&job, &mut on_event).await?
        };

        let placed = match run {
            ToolRun::Interrupted => return Ok(None),
            ToolRun::Completed { placed } => placed,
        };
        if cancel.is_cancelled() {
            return Ok(None);
        }

        progress = progress.finalizing();
        emit(events, &progress);

        let delivery = self.finalize(request, scratch.path(), &placed).await?;

        progress = progress.complete(delivery.delivered);
        emit(events, &progress);

        if let Err(e) = scratch.close() {
            warn!("Failed to remove scratch area: {}", e);
        }
        Ok(Some(delivery))
    }

    fn scratch_dir(&self) -> io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tunegrab-");
        match &self.options.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
    }

    /// Tag every produced file, then copy it to the destination
    async fn finalize(
        &self,
        request: &DownloadRequest,
        scratch: &Path,
        placed: &[PlacedFile],
    ) -> Result<Delivery, PipelineError> {
        let media = collect_media(scratch)?;
        if media.is_empty() {
            warn!("The tool reported success but produced no audio files");
        }

        let cover = self.load_cover(scratch).await;
        let sources = source_positions(placed);
        let single = match (request.positions.as_slice(), media.len()) {
            ([only], 1) => Some(*only),
            _ => None,
        };

        let mut delivery = Delivery::default();
        for path in media {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let position = path
                .file_name()
                .and_then(|n| sources.get(n).copied())
                .or(single);

            let tags = TagSet::for_position(request.album.as_deref(), position, cover.clone());
            match tagging::tag_file_blocking(path.clone(), tags, self.options.tagging).await {
                Ok(()) => {}
                Err(TagError::UnsupportedFormat(kind)) => {
                    debug!("Not tagging {} ({})", name, kind);
                }
                Err(e) => {
                    warn!("Failed to tag {}: {}", name, e);
                    delivery.warnings.push(format!("{}: {}", name, e));
                }
            }

            let destination = request.destination.clone();
            let relocated = tokio::task::spawn_blocking(move || relocate(&path, &destination))
                .await
                .map_err(io::Error::other)
                .and_then(|r| r);
            let target = match relocated {
                Ok(target) => target,
                Err(source) => {
                    warn!("Failed to copy {}: {}", name, source);
                    return Err(PipelineError::Delivery {
                        source,
                        delivered: delivery.files,
                    });
                }
            };
            info!("Saved {}", target.display());
            delivery.files.push(target);
        }

        delivery.delivered = delivery.files.len();
        Ok(delivery)
    }

    async fn load_cover(&self, scratch: &Path) -> Option<Arc<CoverImage>> {
        let path = COVER_EXTENSIONS
            .iter()
            .map(|ext| scratch.join(format!("{}.{}", COVER_STEM, ext)))
            .find(|p| p.is_file())?;
        let max_dimension = self.options.cover_max_dimension;

        let loaded = tokio::task::spawn_blocking(move || -> Result<CoverImage, TagError> {
            let cover = CoverImage::load(&path)?;
            match max_dimension {
                Some(max) => cover.downscaled(max),
                None => Ok(cover),
            }
        })
        .await;

        match loaded {
            Ok(Ok(cover)) => {
                debug!("Loaded cover art ({} bytes)", cover.data.len());
                Some(Arc::new(cover))
            }
            Ok(Err(e)) => {
                warn!("Ignoring cover art: {}", e);
                None
            }
            Err(e) => {
                warn!("Cover art task failed: {}", e);
                None
            }
        }
    }
}

fn emit(events: &UnboundedSender<PipelineEvent>, state: &ProgressState) {
    let _ = events.send(PipelineEvent::Progress {
        percent: state.percent,
        label: state.label.clone(),
    });
}

/// Media files in the scratch area, sorted by name
fn collect_media(scratch: &Path) -> io::Result<Vec<PathBuf>> {
    let mut media = Vec::new();
    for entry in std::fs::read_dir(scratch)? {
        let path = entry?.path();
        let is_media = path.is_file()
            && path
                .extension()
                .and_then(|e| Codec::from_extension(&e.to_string_lossy()))
                .is_some();
        if is_media {
            media.push(path);
        }
    }
    media.sort();
    Ok(media)
}

/// File name -> playlist position, from what the tool reported
fn source_positions(placed: &[PlacedFile]) -> HashMap<OsString, u32> {
    placed
        .iter()
        .filter_map(|p| Some((p.path.file_name()?.to_os_string(), p.position?)))
        .collect()
}
