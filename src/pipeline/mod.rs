//! Download-and-tag pipeline
//!
//! One [`DownloadRequest`] runs through four stages: validate, acquire
//! (external tool, per-item progress folded into one percentage), tag each file,
//! and copy into the destination. The run ends in exactly one [`Outcome`].

mod cancel;
mod orchestrator;
mod progress;
mod relocate;
mod request;

use std::path::PathBuf;
use thiserror::Error;

use crate::acquisition::AcquisitionError;

pub use cancel::CancellationToken;
pub use orchestrator::{DownloadPipeline, Outcome, PipelineEvent, PipelineOptions};
pub use request::{Codec, DownloadRequest};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid download request: {0}")]
    Configuration(String),

    #[error("Acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("I/O error during post-processing: {0}")]
    Io(#[from] std::io::Error),

    /// Copying into the destination stopped partway; `delivered` already landed
    #[error("Copy to destination failed after {} file(s): {source}", .delivered.len())]
    Delivery {
        #[source]
        source: std::io::Error,
        delivered: Vec<PathBuf>,
    },
}

impl PipelineError {
    /// Short line for the user; the full chain goes into the detail
    pub fn summary(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "Invalid download request.",
            PipelineError::Acquisition(_) => "Download failed.",
            PipelineError::Io(_) => "Post-processing failed.",
            PipelineError::Delivery { delivered, .. } if delivered.is_empty() => {
                "Post-processing failed."
            }
            PipelineError::Delivery { .. } => "Some tracks were not delivered.",
        }
    }
}
