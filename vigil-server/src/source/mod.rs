//! Frame sources and capture workers
//!
//! - [`frame`]: `Frame` and the `FrameSource` capability
//! - [`mjpeg`]: splits a concatenated JPEG byte stream into frames
//! - [`ffmpeg`]: live streams and video files decoded by an `ffmpeg` child
//! - [`sequence`]: directory of still images replayed in a loop
//! - [`worker`]: per-source capture → detect → record loop

pub mod ffmpeg;
pub mod frame;
pub mod mjpeg;
pub mod sequence;
pub mod worker;

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use ffmpeg::{FfmpegOptions, FfmpegSource};
pub use frame::{Frame, FrameRead, FrameSource, ImageFormat};
pub use sequence::ImageSequenceSource;
pub use worker::{
    sanitize_source_id, SourceWorker, WorkerConfig, WorkerExit, WorkerHandle, WorkerReport, WorkerState, WorkerStats,
    WorkerTiming,
};

/// Prefix marking an input descriptor as an image-sequence directory
pub const SEQUENCE_PREFIX: &str = "sequence:";

/// Frame source errors
#[derive(Debug, Error)]
pub enum SourceError {
    /// Source could not be opened (or reopened)
    #[error("Failed to open {input}: {reason}")]
    Open { input: String, reason: String },

    /// A single frame read failed
    #[error("Frame read failed: {0}")]
    Read(String),

    /// No frame arrived within the allowed time
    #[error("No frame within {0:?}")]
    Timeout(Duration),

    /// Read attempted before a successful open
    #[error("Source not open")]
    NotOpen,

    /// Image-sequence directory holds no usable images
    #[error("No images in {0}")]
    NoImages(PathBuf),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pacing class of a source, selects the inter-iteration delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Camera / network stream
    Live,
    /// Finite video file
    File,
    /// Still-image directory replay
    ImageSequence,
}

/// Where a worker's frames come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    /// `rtsp://`, `rtsps://`, `http://` or `https://` stream URL
    Stream(String),
    /// Local video file
    File(PathBuf),
    /// Directory of still images (`sequence:<dir>` or an existing directory)
    ImageSequence(PathBuf),
}

impl SourceInput {
    /// Classify an input descriptor from configuration
    pub fn parse(descriptor: &str) -> Self {
        let descriptor = descriptor.trim();
        let lower = descriptor.to_ascii_lowercase();

        if ["rtsp://", "rtsps://", "http://", "https://"]
            .iter()
            .any(|scheme| lower.starts_with(scheme))
        {
            return Self::Stream(descriptor.to_string());
        }

        if let Some(dir) = descriptor.strip_prefix(SEQUENCE_PREFIX) {
            return Self::ImageSequence(PathBuf::from(dir.trim()));
        }

        let path = Path::new(descriptor);
        if path.is_dir() {
            return Self::ImageSequence(path.to_path_buf());
        }

        Self::File(path.to_path_buf())
    }

    /// Pacing class of this input
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Stream(_) => SourceKind::Live,
            Self::File(_) => SourceKind::File,
            Self::ImageSequence(_) => SourceKind::ImageSequence,
        }
    }

    /// Build the frame source for this input
    pub fn build(&self, ffmpeg: &FfmpegOptions) -> Box<dyn FrameSource> {
        match self {
            Self::Stream(url) => Box::new(FfmpegSource::new(url.clone(), SourceKind::Live, ffmpeg.clone())),
            Self::File(path) => {
                // Absolute path so the ffmpeg child is independent of its cwd
                let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
                Box::new(FfmpegSource::new(
                    path.to_string_lossy().into_owned(),
                    SourceKind::File,
                    ffmpeg.clone(),
                ))
            }
            Self::ImageSequence(dir) => Box::new(ImageSequenceSource::new(dir.clone())),
        }
    }
}

impl std::fmt::Display for SourceInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(url) => write!(f, "{}", url),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::ImageSequence(dir) => write!(f, "{}{}", SEQUENCE_PREFIX, dir.display()),
        }
    }
}
