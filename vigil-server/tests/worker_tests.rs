//! SourceWorker behaviour with in-process frame sources and detectors

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use vigil_server::detector::{DetectionInvoker, DetectorError};
use vigil_server::source::{
    Frame, FrameRead, FrameSource, ImageFormat, ImageSequenceSource, SourceError, SourceKind,
    SourceWorker, WorkerConfig, WorkerExit, WorkerState, WorkerTiming,
};
use vigil_server::{EventStore, OverflowPolicy};

const JPEG: &[u8] = b"\xFF\xD8test-frame\xFF\xD9";

#[derive(Debug, Clone, Copy)]
enum Step {
    Frame,
    Error,
    Exhausted,
}

/// Frame source replaying a fixed script
struct ScriptedSource {
    opens: VecDeque<bool>,
    steps: VecDeque<Step>,
    /// Yield frames forever once the script is used up
    repeat_frames: bool,
    open_calls: Arc<AtomicUsize>,
}

impl ScriptedSource {
    fn new(opens: &[bool], steps: &[Step]) -> Self {
        Self {
            opens: opens.iter().copied().collect(),
            steps: steps.iter().copied().collect(),
            repeat_frames: false,
            open_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn endless() -> Self {
        let mut source = Self::new(&[true], &[]);
        source.repeat_frames = true;
        source
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.opens.pop_front().unwrap_or(false) {
            Ok(())
        } else {
            Err(SourceError::Open {
                input: "scripted".to_string(),
                reason: "camera offline".to_string(),
            })
        }
    }

    async fn read_frame(&mut self) -> Result<FrameRead, SourceError> {
        let step = match self.steps.pop_front() {
            Some(step) => step,
            None if self.repeat_frames => Step::Frame,
            None => Step::Exhausted,
        };
        match step {
            Step::Frame => Ok(FrameRead::Frame(Frame::new(JPEG.to_vec(), ImageFormat::Jpeg))),
            Step::Error => Err(SourceError::Read("decode failed".to_string())),
            Step::Exhausted => Ok(FrameRead::Exhausted),
        }
    }

    async fn close(&mut self) {}
}

/// Detector returning canned output, failing the call numbers in `fail_on`
struct FakeDetector {
    output: String,
    fail_on: Vec<usize>,
    calls: AtomicUsize,
    images: Mutex<Vec<PathBuf>>,
}

impl FakeDetector {
    fn new(output: &str) -> Arc<Self> {
        Self::failing(output, &[])
    }

    fn failing(output: &str, fail_on: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            output: output.to_string(),
            fail_on: fail_on.to_vec(),
            calls: AtomicUsize::new(0),
            images: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DetectionInvoker for FakeDetector {
    async fn detect(&self, image: &Path) -> Result<String, DetectorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(image.exists(), "detector called before frame was saved");
        self.images.lock().unwrap().push(image.to_path_buf());
        if self.fail_on.contains(&call) {
            return Err(DetectorError::Timeout(Duration::from_millis(1)));
        }
        Ok(self.output.clone())
    }
}

struct Fixture {
    _root: TempDir,
    temp_dir: PathBuf,
    artifact_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let temp_dir = root.path().join("temp");
        let artifact_dir = root.path().join("artifacts");
        Self {
            _root: root,
            temp_dir,
            artifact_dir,
        }
    }

    fn config(&self, frame_skip: u64) -> WorkerConfig {
        let tick = Duration::from_millis(1);
        WorkerConfig {
            frame_skip,
            timing: WorkerTiming {
                live_frame_delay: tick,
                file_frame_delay: tick,
                sequence_frame_delay: tick,
                read_error_delay: tick,
                reopen_backoff: tick,
                max_consecutive_errors: 5,
            },
            ..WorkerConfig::new("CAM1", self.temp_dir.clone(), self.artifact_dir.clone())
        }
    }

    fn artifact_count(&self) -> usize {
        std::fs::read_dir(&self.artifact_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

fn store(capacity: usize) -> Arc<EventStore> {
    Arc::new(EventStore::new(capacity, OverflowPolicy::Pause).unwrap())
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_read_errors_then_failed_reopen_switch_to_fallback() {
    let fixture = Fixture::new();
    let sequence_dir = TempDir::new().unwrap();
    std::fs::write(sequence_dir.path().join("a.jpg"), JPEG).unwrap();
    std::fs::write(sequence_dir.path().join("b.jpg"), JPEG).unwrap();

    let primary = ScriptedSource::new(&[true], &[Step::Error; 5]);
    let primary_opens = Arc::clone(&primary.open_calls);
    let fallback = ImageSequenceSource::new(sequence_dir.path().to_path_buf());
    let detector = FakeDetector::new("CARRO,0.95,10,20,30,40\n");
    let store = store(100);

    let handle = SourceWorker::new(
        fixture.config(30),
        Box::new(primary),
        Some(Box::new(fallback)),
        detector.clone(),
        Arc::clone(&store),
    )
    .spawn();

    wait_until(|| {
        let store = Arc::clone(&store);
        async move { store.size().await >= 2 }
    })
    .await;
    assert_eq!(handle.state(), WorkerState::FallbackSequence);

    handle.stop();
    let report = handle.join().await;
    assert_eq!(report.exit, WorkerExit::Stopped);
    assert_eq!(report.stats.read_errors, 5);
    // Initial open plus one failed reopen
    assert_eq!(primary_opens.load(Ordering::SeqCst), 2);

    let events = store.drain_all().await;
    assert!(events.len() >= 2);
    for event in &events {
        assert_eq!(event.source_id, "CAM1");
        assert_eq!(event.label, "CARRO");
        assert_eq!(event.confidence, 0.95);
        assert!(fixture.artifact_dir.join(&event.artifact_name).is_file());
    }
    assert_eq!(
        detector.images.lock().unwrap()[0],
        fixture.temp_dir.join("CAM1_frame.jpg")
    );
}

#[tokio::test]
async fn test_frame_skip_processes_every_nth_frame() {
    let fixture = Fixture::new();
    let primary = ScriptedSource::new(&[true], &[Step::Frame; 6]);
    let detector = FakeDetector::new("CARRO,0.95\nPERSONA,0.30\n");
    let store = store(100);

    let report = SourceWorker::new(fixture.config(3), Box::new(primary), None, detector.clone(), Arc::clone(&store))
        .run()
        .await;

    // Exhausted, reopen fails, no fallback
    assert!(matches!(report.exit, WorkerExit::Faulted(_)));
    assert_eq!(report.stats.frames_read, 6);
    assert_eq!(report.stats.frames_processed, 2);
    assert_eq!(detector.calls(), 2);

    let events = store.drain_all().await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.label == "CARRO"));
    assert_eq!(fixture.artifact_count(), 2);
}

#[tokio::test]
async fn test_detector_failure_is_not_fatal() {
    let fixture = Fixture::new();
    let primary = ScriptedSource::new(&[true], &[Step::Frame; 3]);
    let detector = FakeDetector::failing("CARRO,0.95\n", &[1]);
    let store = store(100);

    let report = SourceWorker::new(fixture.config(1), Box::new(primary), None, detector.clone(), Arc::clone(&store))
        .run()
        .await;

    assert_eq!(detector.calls(), 3);
    assert_eq!(report.stats.detector_failures, 1);
    assert_eq!(report.stats.events_recorded, 2);
    assert_eq!(store.size().await, 2);
}

#[tokio::test]
async fn test_read_errors_below_threshold_keep_streaming() {
    let fixture = Fixture::new();
    let steps = [Step::Error, Step::Error, Step::Frame, Step::Error, Step::Frame];
    let primary = ScriptedSource::new(&[true], &steps);
    let primary_opens = Arc::clone(&primary.open_calls);
    let detector = FakeDetector::new("CARRO,0.95\n");
    let store = store(100);

    let report = SourceWorker::new(fixture.config(1), Box::new(primary), None, detector, Arc::clone(&store))
        .run()
        .await;

    assert_eq!(report.stats.read_errors, 3);
    assert_eq!(report.stats.events_recorded, 2);
    // One reopen, after the script ran out
    assert_eq!(primary_opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_exhausted_source_reopens() {
    let fixture = Fixture::new();
    let steps = [Step::Frame, Step::Exhausted, Step::Frame];
    let primary = ScriptedSource::new(&[true, true], &steps);
    let detector = FakeDetector::new("CARRO,0.95\n");
    let store = store(100);

    let report = SourceWorker::new(fixture.config(1), Box::new(primary), None, detector, Arc::clone(&store))
        .run()
        .await;

    assert_eq!(report.stats.reopens, 2);
    assert_eq!(report.stats.events_recorded, 2);
}

#[tokio::test]
async fn test_paused_store_skips_detection() {
    let fixture = Fixture::new();
    let primary = ScriptedSource::new(&[true], &[Step::Frame; 4]);
    let detector = FakeDetector::new("CARRO,0.95\n");
    let store = store(1);

    let report = SourceWorker::new(fixture.config(1), Box::new(primary), None, detector.clone(), Arc::clone(&store))
        .run()
        .await;

    assert_eq!(detector.calls(), 1);
    assert_eq!(report.stats.events_recorded, 1);
    assert!(store.is_paused().await);
    assert_eq!(fixture.artifact_count(), 1);
}

#[tokio::test]
async fn test_rejected_event_image_removed() {
    let fixture = Fixture::new();
    let primary = ScriptedSource::new(&[true], &[Step::Frame]);
    let detector = FakeDetector::new("CARRO,0.95\nPERSONA,0.90\n");
    let store = store(1);

    let report = SourceWorker::new(fixture.config(1), Box::new(primary), None, detector, Arc::clone(&store))
        .run()
        .await;

    assert_eq!(report.stats.events_recorded, 1);
    assert_eq!(report.stats.events_rejected, 1);
    assert_eq!(fixture.artifact_count(), 1);
    let kept = store.peek_last(1).await;
    assert!(fixture.artifact_dir.join(&kept[0].artifact_name).exists());
}

#[tokio::test]
async fn test_open_failure_without_fallback_terminates() {
    let fixture = Fixture::new();
    let primary = ScriptedSource::new(&[false], &[]);
    let detector = FakeDetector::new("CARRO,0.95\n");

    let handle = SourceWorker::new(fixture.config(1), Box::new(primary), None, detector.clone(), store(10)).spawn();
    let mut state = handle.subscribe_state();
    let report = handle.join().await;

    match report.exit {
        WorkerExit::Faulted(reason) => assert!(reason.contains("camera offline")),
        other => panic!("expected Faulted, got {:?}", other),
    }
    assert_eq!(*state.borrow_and_update(), WorkerState::Terminated);
    assert_eq!(detector.calls(), 0);
}

#[tokio::test]
async fn test_stop_ends_endless_stream() {
    let fixture = Fixture::new();
    let detector = FakeDetector::new("");
    let store = store(10);

    let handle = SourceWorker::new(
        fixture.config(1),
        Box::new(ScriptedSource::endless()),
        None,
        detector.clone(),
        Arc::clone(&store),
    )
    .spawn();

    let calls = Arc::clone(&detector);
    wait_until(move || {
        let calls = Arc::clone(&calls);
        async move { calls.calls() >= 3 }
    })
    .await;
    assert_eq!(handle.state(), WorkerState::Streaming);

    handle.stop();
    let report = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("worker did not stop");
    assert_eq!(report.exit, WorkerExit::Stopped);
    assert_eq!(store.size().await, 0);
}
