//! Per-source capture worker
//!
//! One worker per camera or video source. Each iteration reads a frame,
//! applies the frame-skip ratio, runs the detector on the kept frames and
//! records every detection that clears the confidence threshold.
//!
//! **State machine:**
//!
//! ```text
//!  Streaming ──(exhausted / N consecutive read errors)──► Reopening
//!  Reopening ──(reopen ok)──► Streaming
//!  Reopening ──(reopen failed, fallback configured)──► FallbackSequence
//!  Reopening ──(reopen failed, no fallback)──► Terminated
//!  FallbackSequence ──(fallback unusable)──► Terminated
//! ```
//!
//! Stop is cooperative: the shared `running` flag is checked at the top of
//! every iteration, so an in-flight detector call completes first.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use vigil_common::artifact::generate_artifact_name;
use vigil_common::DetectionEvent;

use super::frame::{Frame, FrameRead, FrameSource, ImageFormat};
use super::{SourceError, SourceKind};
use crate::detector::{parse_detections, DetectionInvoker, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::store::{AppendOutcome, EventStore};

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Reading from the primary source
    Streaming,
    /// Primary source released, waiting to reopen
    Reopening,
    /// Reading from the fallback image sequence
    FallbackSequence,
    /// No usable source left
    Terminated,
}

/// How a worker finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// `running` was cleared
    Stopped,
    /// Recovery exhausted; carries the reason
    Faulted(String),
}

/// Counters reported when a worker exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub frames_read: u64,
    pub frames_processed: u64,
    pub read_errors: u64,
    pub reopens: u64,
    pub detector_failures: u64,
    pub events_recorded: u64,
    pub events_rejected: u64,
}

/// Final outcome of a worker task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub source_id: String,
    pub exit: WorkerExit,
    pub stats: WorkerStats,
}

/// Loop pacing and recovery parameters
#[derive(Debug, Clone)]
pub struct WorkerTiming {
    /// Delay after a processed live-stream frame
    pub live_frame_delay: Duration,
    /// Delay after a processed video-file frame
    pub file_frame_delay: Duration,
    /// Delay after a processed image-sequence frame
    pub sequence_frame_delay: Duration,
    /// Delay after a failed read below the error threshold
    pub read_error_delay: Duration,
    /// Delay before reopening the primary source
    pub reopen_backoff: Duration,
    /// Consecutive read errors that trigger a reopen
    pub max_consecutive_errors: u32,
}

impl Default for WorkerTiming {
    fn default() -> Self {
        Self {
            live_frame_delay: Duration::from_millis(100),
            file_frame_delay: Duration::from_millis(1000),
            sequence_frame_delay: Duration::from_millis(3000),
            read_error_delay: Duration::from_millis(500),
            reopen_backoff: Duration::from_millis(1000),
            max_consecutive_errors: 5,
        }
    }
}

impl WorkerTiming {
    /// Inter-iteration delay after processing a frame from a `kind` source
    pub fn frame_delay(&self, kind: SourceKind) -> Duration {
        match kind {
            SourceKind::Live => self.live_frame_delay,
            SourceKind::File => self.file_frame_delay,
            SourceKind::ImageSequence => self.sequence_frame_delay,
        }
    }
}

/// Static worker parameters
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub source_id: String,
    /// Process 1 of every `frame_skip` primary-source frames (minimum 1)
    pub frame_skip: u64,
    pub confidence_threshold: f64,
    /// Directory for this worker's scratch frame
    pub temp_dir: PathBuf,
    /// Directory served by the artifact server
    pub artifact_dir: PathBuf,
    pub timing: WorkerTiming,
}

impl WorkerConfig {
    pub fn new(source_id: impl Into<String>, temp_dir: PathBuf, artifact_dir: PathBuf) -> Self {
        Self {
            source_id: source_id.into(),
            frame_skip: 1,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            temp_dir,
            artifact_dir,
            timing: WorkerTiming::default(),
        }
    }
}

/// Capture → skip → detect → record loop for one source
pub struct SourceWorker {
    config: WorkerConfig,
    primary: Box<dyn FrameSource>,
    fallback: Option<Box<dyn FrameSource>>,
    invoker: Arc<dyn DetectionInvoker>,
    store: Arc<EventStore>,
    running: Arc<AtomicBool>,
    state: WorkerState,
    state_tx: watch::Sender<WorkerState>,
    fault: Option<String>,
    frame_counter: u64,
    consecutive_errors: u32,
    stats: WorkerStats,
}

impl SourceWorker {
    pub fn new(
        config: WorkerConfig,
        primary: Box<dyn FrameSource>,
        fallback: Option<Box<dyn FrameSource>>,
        invoker: Arc<dyn DetectionInvoker>,
        store: Arc<EventStore>,
    ) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Streaming);
        Self {
            config,
            primary,
            fallback,
            invoker,
            store,
            running: Arc::new(AtomicBool::new(true)),
            state: WorkerState::Streaming,
            state_tx,
            fault: None,
            frame_counter: 0,
            consecutive_errors: 0,
            stats: WorkerStats::default(),
        }
    }

    /// Shared stop flag; storing `false` stops the loop at its next iteration
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Spawn the worker loop on the Tokio runtime
    pub fn spawn(self) -> WorkerHandle {
        let source_id = self.config.source_id.clone();
        let running = self.running_flag();
        let state_rx = self.state_tx.subscribe();
        let join = tokio::spawn(self.run());

        WorkerHandle {
            source_id,
            running,
            state_rx,
            join,
        }
    }

    /// Run the loop to completion on the current task
    pub async fn run(mut self) -> WorkerReport {
        let source_id = self.config.source_id.clone();
        info!(source_id = %source_id, "Starting capture: {}", self.primary.describe());

        let exit = match prepare_directories(&self.config).await {
            Ok(()) => {
                let initial = match self.primary.open().await {
                    Ok(()) => WorkerState::Streaming,
                    Err(e) => {
                        warn!(source_id = %source_id, "Could not open source: {}", e);
                        self.fall_back(e).await
                    }
                };
                self.set_state(initial);
                self.run_loop().await
            }
            Err(e) => WorkerExit::Faulted(format!("Cannot prepare directories: {}", e)),
        };

        self.primary.close().await;
        if let Some(fallback) = self.fallback.as_mut() {
            fallback.close().await;
        }

        match &exit {
            WorkerExit::Stopped => info!(
                source_id = %source_id,
                "Capture stopped: {} frames read, {} processed, {} events",
                self.stats.frames_read,
                self.stats.frames_processed,
                self.stats.events_recorded
            ),
            WorkerExit::Faulted(reason) => error!(
                source_id = %source_id,
                "Capture terminated: {} ({} frames read, {} events)",
                reason,
                self.stats.frames_read,
                self.stats.events_recorded
            ),
        }

        WorkerReport {
            source_id,
            exit,
            stats: self.stats,
        }
    }

    async fn run_loop(&mut self) -> WorkerExit {
        loop {
            if !self.running.load(Ordering::Relaxed) {
                return WorkerExit::Stopped;
            }

            match self.state {
                WorkerState::Streaming => self.stream_step().await,
                WorkerState::Reopening => self.reopen_step().await,
                WorkerState::FallbackSequence => self.fallback_step().await,
                WorkerState::Terminated => {
                    let reason = self
                        .fault
                        .take()
                        .unwrap_or_else(|| "source unavailable".to_string());
                    return WorkerExit::Faulted(reason);
                }
            }
        }
    }

    fn set_state(&mut self, state: WorkerState) {
        if self.state != state {
            debug!(
                source_id = %self.config.source_id,
                "Worker state {:?} -> {:?}", self.state, state
            );
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }

    /// One primary-source iteration
    async fn stream_step(&mut self) {
        match self.primary.read_frame().await {
            Ok(FrameRead::Frame(frame)) => {
                self.consecutive_errors = 0;
                self.frame_counter += 1;
                self.stats.frames_read += 1;

                let skip = self.config.frame_skip.max(1);
                if self.frame_counter % skip != 0 {
                    return;
                }

                self.process_frame(&frame).await;
                sleep(self.config.timing.frame_delay(self.primary.kind())).await;
            }
            Ok(FrameRead::Exhausted) => {
                info!(
                    source_id = %self.config.source_id,
                    "End of source after {} frames, reopening", self.frame_counter
                );
                self.set_state(WorkerState::Reopening);
            }
            Err(e) => {
                if self.record_read_error(&e) {
                    warn!(
                        source_id = %self.config.source_id,
                        "{} consecutive read errors, reopening", self.consecutive_errors
                    );
                    self.set_state(WorkerState::Reopening);
                } else {
                    sleep(self.config.timing.read_error_delay).await;
                }
            }
        }
    }

    /// Release, back off, reopen; fall back when the reopen fails
    async fn reopen_step(&mut self) {
        self.primary.close().await;
        sleep(self.config.timing.reopen_backoff).await;
        self.stats.reopens += 1;

        match self.primary.open().await {
            Ok(()) => {
                info!(source_id = %self.config.source_id, "Source reopened");
                self.frame_counter = 0;
                self.consecutive_errors = 0;
                self.set_state(WorkerState::Streaming);
            }
            Err(e) => {
                warn!(source_id = %self.config.source_id, "Reopen failed: {}", e);
                let next = self.fall_back(e).await;
                self.set_state(next);
            }
        }
    }

    /// Open the fallback source, or record the fault when there is none
    async fn fall_back(&mut self, reason: SourceError) -> WorkerState {
        self.consecutive_errors = 0;

        let Some(fallback) = self.fallback.as_mut() else {
            self.fault = Some(reason.to_string());
            return WorkerState::Terminated;
        };

        match fallback.open().await {
            Ok(()) => {
                warn!(
                    source_id = %self.config.source_id,
                    "Switching to fallback: {}", fallback.describe()
                );
                WorkerState::FallbackSequence
            }
            Err(e) => {
                self.fault = Some(format!("{}; fallback unavailable: {}", reason, e));
                WorkerState::Terminated
            }
        }
    }

    /// One fallback-source iteration
    async fn fallback_step(&mut self) {
        let Some(fallback) = self.fallback.as_mut() else {
            self.fault = Some("fallback source missing".to_string());
            self.set_state(WorkerState::Terminated);
            return;
        };

        let kind = fallback.kind();
        let read = fallback.read_frame().await;

        match read {
            Ok(FrameRead::Frame(frame)) => {
                self.consecutive_errors = 0;
                self.stats.frames_read += 1;
                self.process_frame(&frame).await;
                sleep(self.config.timing.frame_delay(kind)).await;
            }
            Ok(FrameRead::Exhausted) => self.reopen_fallback("fallback exhausted".to_string()).await,
            Err(e) => {
                if self.record_read_error(&e) {
                    self.reopen_fallback(e.to_string()).await;
                } else {
                    sleep(self.config.timing.read_error_delay).await;
                }
            }
        }
    }

    async fn reopen_fallback(&mut self, reason: String) {
        self.consecutive_errors = 0;
        let Some(fallback) = self.fallback.as_mut() else {
            return;
        };

        fallback.close().await;
        sleep(self.config.timing.reopen_backoff).await;
        if let Err(e) = fallback.open().await {
            self.fault = Some(format!("{}; fallback reopen failed: {}", reason, e));
            self.set_state(WorkerState::Terminated);
        }
    }

    /// Count a failed read; true when the consecutive-error threshold is reached
    fn record_read_error(&mut self, e: &SourceError) -> bool {
        self.consecutive_errors += 1;
        self.stats.read_errors += 1;
        debug!(
            source_id = %self.config.source_id,
            "Frame read error {}/{}: {}",
            self.consecutive_errors,
            self.config.timing.max_consecutive_errors,
            e
        );
        self.consecutive_errors >= self.config.timing.max_consecutive_errors
    }

    /// Scratch path for frames handed to the detector
    fn temp_frame_path(&self, format: ImageFormat) -> PathBuf {
        self.config.temp_dir.join(format!(
            "{}_frame.{}",
            sanitize_source_id(&self.config.source_id),
            format.extension()
        ))
    }

    /// Detect objects in one frame and record the resulting events
    async fn process_frame(&mut self, frame: &Frame) {
        if self.store.is_paused().await {
            debug!(
                source_id = %self.config.source_id,
                "Event store paused, skipping detection"
            );
            return;
        }

        self.stats.frames_processed += 1;
        let temp_path = self.temp_frame_path(frame.format());
        if let Err(e) = frame.persist(&temp_path).await {
            warn!(
                source_id = %self.config.source_id,
                "Failed to save frame to {}: {}", temp_path.display(), e
            );
            return;
        }

        let output = match self.invoker.detect(&temp_path).await {
            Ok(output) => output,
            Err(e) => {
                self.stats.detector_failures += 1;
                warn!(source_id = %self.config.source_id, "Detection failed: {}", e);
                return;
            }
        };

        for detection in parse_detections(&output, self.config.confidence_threshold) {
            let artifact_name = generate_artifact_name(frame.format().extension());
            let artifact_path = self.config.artifact_dir.join(&artifact_name);
            if let Err(e) = frame.persist(&artifact_path).await {
                warn!(
                    source_id = %self.config.source_id,
                    "Failed to save detection image {}: {}", artifact_path.display(), e
                );
                continue;
            }

            let event = DetectionEvent::new(
                self.config.source_id.clone(),
                detection.label,
                artifact_name,
                detection.confidence,
            );
            info!(source_id = %self.config.source_id, "{}", event);

            match self.store.append(event).await {
                AppendOutcome::Rejected => {
                    self.stats.events_rejected += 1;
                    // Nothing references the image once the event is rejected
                    if let Err(e) = tokio::fs::remove_file(&artifact_path).await {
                        warn!(
                            source_id = %self.config.source_id,
                            "Failed to remove rejected detection image {}: {}",
                            artifact_path.display(),
                            e
                        );
                    }
                }
                _ => self.stats.events_recorded += 1,
            }
        }
    }
}

async fn prepare_directories(config: &WorkerConfig) -> std::io::Result<()> {
    tokio::fs::create_dir_all(&config.temp_dir).await?;
    tokio::fs::create_dir_all(&config.artifact_dir).await
}

/// File-name-safe form of a source id
pub fn sanitize_source_id(source_id: &str) -> String {
    source_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Handle to a spawned worker
pub struct WorkerHandle {
    source_id: String,
    running: Arc<AtomicBool>,
    state_rx: watch::Receiver<WorkerState>,
    join: JoinHandle<WorkerReport>,
}

impl WorkerHandle {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Request a cooperative stop
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Latest state published by the worker
    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    /// Receiver for state changes
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the worker task to finish
    pub async fn join(self) -> WorkerReport {
        let source_id = self.source_id;
        match self.join.await {
            Ok(report) => report,
            Err(e) => WorkerReport {
                source_id,
                exit: WorkerExit::Faulted(format!("worker task failed: {}", e)),
                stats: WorkerStats::default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_source_id() {
        assert_eq!(sanitize_source_id("CAM1"), "CAM1");
        assert_eq!(sanitize_source_id("gate/north cam"), "gate_north_cam");
        assert_eq!(sanitize_source_id("../x"), "___x");
    }

    #[test]
    fn test_frame_delay_per_kind() {
        let timing = WorkerTiming::default();
        assert_eq!(timing.frame_delay(SourceKind::Live), Duration::from_millis(100));
        assert_eq!(timing.frame_delay(SourceKind::File), Duration::from_millis(1000));
        assert_eq!(
            timing.frame_delay(SourceKind::ImageSequence),
            Duration::from_millis(3000)
        );
        assert_eq!(timing.max_consecutive_errors, 5);
    }

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::new("CAM1", PathBuf::from("tmp"), PathBuf::from("img"));
        assert_eq!(config.frame_skip, 1);
        assert_eq!(config.confidence_threshold, DEFAULT_CONFIDENCE_THRESHOLD);
    }
}
