//! Image-sequence frame source
//!
//! Replays the still images of one directory in name order, looping forever.
//! Serves as the fallback when a stream or video file cannot be (re)opened.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};
use vigil_common::artifact::has_allowed_extension;

use super::frame::{Frame, FrameRead, FrameSource, ImageFormat};
use super::{SourceError, SourceKind};

/// Looping directory replay
pub struct ImageSequenceSource {
    dir: PathBuf,
    images: Vec<PathBuf>,
    index: usize,
}

impl ImageSequenceSource {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            images: Vec::new(),
            index: 0,
        }
    }

    /// Images found by the last `open`
    pub fn images(&self) -> &[PathBuf] {
        &self.images
    }

    async fn scan(&self) -> Result<Vec<PathBuf>, SourceError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| SourceError::Open {
            input: self.dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut images = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || !has_allowed_extension(&name) {
                continue;
            }
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                images.push(path);
            }
        }
        images.sort();
        Ok(images)
    }
}

#[async_trait]
impl FrameSource for ImageSequenceSource {
    fn describe(&self) -> String {
        format!("image sequence {}", self.dir.display())
    }

    fn kind(&self) -> SourceKind {
        SourceKind::ImageSequence
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let images = self.scan().await?;
        if images.is_empty() {
            return Err(SourceError::NoImages(self.dir.clone()));
        }

        info!(
            "Image sequence mode: {} images found in {}",
            images.len(),
            self.dir.display()
        );
        self.images = images;
        self.index = 0;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<FrameRead, SourceError> {
        if self.images.is_empty() {
            return Err(SourceError::NotOpen);
        }

        let path = self.images[self.index % self.images.len()].clone();
        self.index = self.index.wrapping_add(1);

        debug!("Reading sequence image {}", path.display());
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| SourceError::Read(format!("{}: {}", path.display(), e)))?;
        if data.is_empty() {
            return Err(SourceError::Read(format!("{}: empty image", path.display())));
        }

        let format = ImageFormat::from_path(&path).unwrap_or(ImageFormat::Jpeg);
        Ok(FrameRead::Frame(Frame::new(data, format)))
    }

    async fn close(&mut self) {
        self.images.clear();
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn frame_data(read: FrameRead) -> Vec<u8> {
        match read {
            FrameRead::Frame(frame) => frame.data().to_vec(),
            FrameRead::Exhausted => panic!("image sequence never exhausts"),
        }
    }

    #[tokio::test]
    async fn test_loops_over_images_in_name_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.png"), b"B").unwrap();
        fs::write(dir.path().join("a.jpg"), b"A").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        fs::write(dir.path().join(".hidden.jpg.part"), b"ignored").unwrap();

        let mut source = ImageSequenceSource::new(dir.path().to_path_buf());
        source.open().await.unwrap();
        assert_eq!(source.images().len(), 2);

        assert_eq!(frame_data(source.read_frame().await.unwrap()), b"A");
        let second = source.read_frame().await.unwrap();
        if let FrameRead::Frame(frame) = &second {
            assert_eq!(frame.format(), ImageFormat::Png);
        }
        assert_eq!(frame_data(second), b"B");
        assert_eq!(frame_data(source.read_frame().await.unwrap()), b"A");
    }

    #[tokio::test]
    async fn test_open_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let mut source = ImageSequenceSource::new(dir.path().join("absent"));
        assert!(matches!(source.open().await, Err(SourceError::Open { .. })));
    }

    #[tokio::test]
    async fn test_open_directory_without_images_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("readme.md"), b"x").unwrap();

        let mut source = ImageSequenceSource::new(dir.path().to_path_buf());
        assert!(matches!(source.open().await, Err(SourceError::NoImages(_))));
    }

    #[tokio::test]
    async fn test_read_after_close_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.jpg"), b"A").unwrap();

        let mut source = ImageSequenceSource::new(dir.path().to_path_buf());
        source.open().await.unwrap();
        source.close().await;
        assert!(matches!(source.read_frame().await, Err(SourceError::NotOpen)));
    }

    #[tokio::test]
    async fn test_unreadable_image_is_read_error_and_advances() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.jpg"), b"A").unwrap();
        fs::write(dir.path().join("b.jpg"), b"B").unwrap();

        let mut source = ImageSequenceSource::new(dir.path().to_path_buf());
        source.open().await.unwrap();
        fs::remove_file(dir.path().join("a.jpg")).unwrap();

        assert!(matches!(source.read_frame().await, Err(SourceError::Read(_))));
        assert_eq!(frame_data(source.read_frame().await.unwrap()), b"B");
    }
}
