//! Detector invocation
//!
//! The detector is an external program called with one image path argument.
//! It prints result lines on stdout and exits; anything written to stderr is
//! diagnostic only.
//!
//! `DetectionInvoker` is the seam between capture workers and that process,
//! so tests can substitute an in-process detector.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Detector invocation errors
///
/// All variants are transient from the worker's point of view: the frame is
/// skipped and the capture loop continues.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// Failed to start the detector process
    #[error("Failed to spawn detector '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Detector ran longer than the configured timeout and was killed
    #[error("Detector timed out after {0:?}")]
    Timeout(Duration),

    /// Detector exited with a failure status
    #[error("Detector exited with code {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    /// Detector stdout is not valid UTF-8
    #[error("Detector output is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    /// Waiting on the detector process failed
    #[error("Detector I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs object detection on a saved image
#[async_trait]
pub trait DetectionInvoker: Send + Sync {
    /// Detect objects in the image at `image`, returning the raw result text
    async fn detect(&self, image: &Path) -> Result<String, DetectorError>;
}

/// Default detector timeout
pub const DEFAULT_DETECTOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Invokes an external detector program as a child process
///
/// Command line: `<program> <args...> <image>`, e.g. `python3 detect.py frame.jpg`.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandInvoker {
    /// Create an invoker for `program` with leading `args`
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Some(DEFAULT_DETECTOR_TIMEOUT),
        }
    }

    /// Python detector script, run as `python3 <script> <image>`
    pub fn python_script(script: impl Into<PathBuf>) -> Self {
        let script: PathBuf = script.into();
        Self::new("python3", vec![script.to_string_lossy().into_owned()])
    }

    /// Set or disable (`None`) the per-invocation timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program being invoked
    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl DetectionInvoker for CommandInvoker {
    async fn detect(&self, image: &Path) -> Result<String, DetectorError> {
        // kill_on_drop: a timed-out invocation drops the Child, which kills the process
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DetectorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        program = %self.program,
                        image = %image.display(),
                        "Detector timeout ({:?}), process killed",
                        limit
                    );
                    return Err(DetectorError::Timeout(limit));
                }
            },
            None => child.wait_with_output().await?,
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            debug!(program = %self.program, "Detector stderr: {}", stderr);
        }

        if !output.status.success() {
            return Err(DetectorError::NonZeroExit {
                code: output.status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> CommandInvoker {
        // `sh -c <script> sh <image>`: the image path arrives as $1
        CommandInvoker::new("sh", vec!["-c".to_string(), script.to_string(), "sh".to_string()])
    }

    #[tokio::test]
    async fn test_captures_stdout_and_passes_image_path() {
        let invoker = shell("echo \"CARRO,0.95,$1\"");
        let output = invoker.detect(Path::new("/tmp/frame.jpg")).await.unwrap();
        assert_eq!(output.trim(), "CARRO,0.95,/tmp/frame.jpg");
    }

    #[tokio::test]
    async fn test_stderr_not_part_of_output() {
        let invoker = shell("echo 'INFO: model loaded' >&2; echo 'PERSONA,0.80'");
        let output = invoker.detect(Path::new("x.jpg")).await.unwrap();
        assert_eq!(output.trim(), "PERSONA,0.80");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let invoker = shell("echo 'ERROR: model missing' >&2; exit 3");
        match invoker.detect(Path::new("x.jpg")).await {
            Err(DetectorError::NonZeroExit { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("model missing"));
            }
            other => panic!("expected NonZeroExit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let invoker = CommandInvoker::new("/nonexistent/detector-binary", Vec::new());
        assert!(matches!(
            invoker.detect(Path::new("x.jpg")).await,
            Err(DetectorError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn test_timeout_kills_detector() {
        let invoker = shell("sleep 5").with_timeout(Some(Duration::from_millis(100)));
        assert!(matches!(
            invoker.detect(Path::new("x.jpg")).await,
            Err(DetectorError::Timeout(_))
        ));
    }

    #[test]
    fn test_python_script_command_line() {
        let invoker = CommandInvoker::python_script("./detect.py");
        assert_eq!(invoker.program(), "python3");
        assert_eq!(invoker.args, vec!["./detect.py".to_string()]);
    }
}
