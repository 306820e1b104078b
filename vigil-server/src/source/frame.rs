//! Frames and the frame-source capability
//!
//! Frames are already-encoded still images (JPEG from the ffmpeg pipe, JPEG or
//! PNG from an image directory). Persisting a frame writes its bytes as-is.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{SourceError, SourceKind};

/// Encoding of a frame's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// File extension used for persisted frames
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    /// Format implied by a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }
}

/// One encoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    format: ImageFormat,
}

impl Frame {
    pub fn new(data: Vec<u8>, format: ImageFormat) -> Self {
        Self { data, format }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Encoded size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write the frame to `path`
    ///
    /// The bytes go to a hidden `.<name>.part` sibling first and are renamed
    /// into place, so readers never observe a partially written image.
    pub async fn persist(&self, path: &Path) -> std::io::Result<()> {
        let partial = partial_path(path);
        tokio::fs::write(&partial, &self.data).await?;
        if let Err(e) = tokio::fs::rename(&partial, path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        Ok(())
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.part", name))
}

/// Outcome of a successful read call
#[derive(Debug)]
pub enum FrameRead {
    /// Next frame
    Frame(Frame),
    /// Finite source reached its end
    Exhausted,
}

/// Capability to read frames from a camera, file, or image set
///
/// A source is opened before reading and may be closed and reopened any
/// number of times.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Human-readable input description for logs
    fn describe(&self) -> String;

    /// Pacing class
    fn kind(&self) -> SourceKind;

    /// Open (or reopen) the source
    async fn open(&mut self) -> Result<(), SourceError>;

    /// Read the next frame
    async fn read_frame(&mut self) -> Result<FrameRead, SourceError>;

    /// Release the source; reading afterwards requires `open`
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_from_path() {
        assert_eq!(ImageFormat::from_path(Path::new("a.JPG")), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_path(Path::new("a.jpeg")), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_path(Path::new("a.png")), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_path(Path::new("a.bmp")), None);
        assert_eq!(ImageFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        assert_eq!(
            partial_path(Path::new("/data/images/abc.jpg")),
            PathBuf::from("/data/images/.abc.jpg.part")
        );
    }

    #[tokio::test]
    async fn test_persist_writes_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("CAM1_frame.jpg");

        Frame::new(vec![1, 2, 3], ImageFormat::Jpeg).persist(&path).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);

        Frame::new(vec![9; 10], ImageFormat::Jpeg).persist(&path).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![9; 10]);

        // No partial file left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_persist_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("a.jpg");
        assert!(Frame::new(vec![1], ImageFormat::Jpeg).persist(&path).await.is_err());
    }
}
