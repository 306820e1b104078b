//! Streams and video files decoded by an `ffmpeg` child process
//!
//! ffmpeg re-encodes every decoded frame as JPEG and writes the images to its
//! stdout (`-f image2pipe -vcodec mjpeg`). The pipe gives natural
//! backpressure: ffmpeg blocks while the worker is busy with detection.
//!
//! Uses `kill_on_drop(true)` so a dropped source never leaves a stray ffmpeg
//! process behind.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info};

use super::frame::{Frame, FrameRead, FrameSource, ImageFormat};
use super::mjpeg::{MjpegSplitter, DEFAULT_MAX_FRAME_LEN};
use super::{SourceError, SourceKind};

const READ_CHUNK: usize = 64 * 1024;

/// ffmpeg invocation settings
#[derive(Debug, Clone)]
pub struct FfmpegOptions {
    /// ffmpeg executable
    pub program: String,
    /// Time allowed for the first frame after (re)opening
    pub open_timeout: Duration,
    /// Time allowed for each subsequent frame
    pub read_timeout: Duration,
    /// JPEG quality scale passed as `-q:v` (2 = best, 31 = worst)
    pub jpeg_quality: u8,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            open_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(10),
            jpeg_quality: 5,
        }
    }
}

/// Frame source backed by an ffmpeg child process
pub struct FfmpegSource {
    input: String,
    kind: SourceKind,
    options: FfmpegOptions,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    splitter: MjpegSplitter,
    /// First frame read by `open`, returned by the next `read_frame`
    pending: Option<Frame>,
}

impl FfmpegSource {
    pub fn new(input: String, kind: SourceKind, options: FfmpegOptions) -> Self {
        Self {
            input,
            kind,
            options,
            child: None,
            stdout: None,
            splitter: MjpegSplitter::new(DEFAULT_MAX_FRAME_LEN),
            pending: None,
        }
    }

    /// ffmpeg arguments for this input
    fn command_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-loglevel".into(), "error".into()];

        if self.input.to_ascii_lowercase().starts_with("rtsp") {
            // TCP for RTSP (more reliable than UDP through NAT/firewalls)
            args.extend(["-rtsp_transport".into(), "tcp".into()]);
        }

        args.extend([
            "-i".into(),
            self.input.clone(),
            "-f".into(),
            "image2pipe".into(),
            "-vcodec".into(),
            "mjpeg".into(),
            "-q:v".into(),
            self.options.jpeg_quality.to_string(),
            "-".into(),
        ]);
        args
    }

    /// Read until the splitter yields a frame; `None` on end of stream
    async fn next_jpeg(&mut self) -> Result<Option<Frame>, SourceError> {
        let stdout = self.stdout.as_mut().ok_or(SourceError::NotOpen)?;
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            if let Some(bytes) = self.splitter.next_frame() {
                return Ok(Some(Frame::new(bytes, ImageFormat::Jpeg)));
            }

            let n = stdout
                .read(&mut chunk)
                .await
                .map_err(|e| SourceError::Read(e.to_string()))?;
            if n == 0 {
                return Ok(None);
            }
            self.splitter.push(&chunk[..n]);
        }
    }

    async fn next_jpeg_within(&mut self, limit: Duration) -> Result<Option<Frame>, SourceError> {
        match tokio::time::timeout(limit, self.next_jpeg()).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(limit)),
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    fn describe(&self) -> String {
        self.input.clone()
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        self.close().await;

        let mut child = Command::new(&self.options.program)
            .args(self.command_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SourceError::Open {
                input: self.input.clone(),
                reason: format!("ffmpeg spawn failed: {}", e),
            })?;

        self.stdout = child.stdout.take();
        self.child = Some(child);

        // A source only counts as open once it produced a frame
        match self.next_jpeg_within(self.options.open_timeout).await {
            Ok(Some(frame)) => {
                info!("Opened {} (first frame {} bytes)", self.input, frame.len());
                self.pending = Some(frame);
                Ok(())
            }
            Ok(None) => {
                self.close().await;
                Err(SourceError::Open {
                    input: self.input.clone(),
                    reason: "stream ended before first frame".to_string(),
                })
            }
            Err(e) => {
                self.close().await;
                Err(SourceError::Open {
                    input: self.input.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn read_frame(&mut self) -> Result<FrameRead, SourceError> {
        if let Some(frame) = self.pending.take() {
            return Ok(FrameRead::Frame(frame));
        }

        match self.next_jpeg_within(self.options.read_timeout).await? {
            Some(frame) => Ok(FrameRead::Frame(frame)),
            None => Ok(FrameRead::Exhausted),
        }
    }

    async fn close(&mut self) {
        self.stdout = None;
        self.pending = None;
        self.splitter.reset();

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!("ffmpeg for {} already exited: {}", self.input, e);
            }
        }
    }
}
