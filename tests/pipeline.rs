use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lookout::capture::{Frame, FrameSource, PixelFormat};
use lookout::detect::{ColorRegionDetector, DetectionEvent, Detector, DetectorKind, Payload, Rect};
use lookout::error::{CaptureError, DetectError, PipelineError};
use lookout::pipeline::{Clock, PipelineLoop, PipelineState, StopReason, MAX_CORRUPT_FRAMES};
use lookout::Config;
use tempfile::TempDir;

/// Yields `frames` copies of one frame, then fails every read.
struct ScriptedSource {
    frame: Frame,
    remaining: usize,
    /// Read indices that return undecodable data
    corrupt: Vec<usize>,
    reads: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedSource {
    fn new(frames: usize) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        Self::with_frame(frames, Frame::new(vec![80u8; 16 * 16 * 3], 16, 16, PixelFormat::Rgb24))
    }

    fn with_frame(frames: usize, frame: Frame) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let source = Self {
            frame,
            remaining: frames,
            corrupt: Vec::new(),
            reads: Arc::clone(&reads),
            closes: Arc::clone(&closes),
        };
        (source, reads, closes)
    }

    fn corrupt_on(mut self, reads: impl IntoIterator<Item = usize>) -> Self {
        self.corrupt = reads.into_iter().collect();
        self
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.corrupt.contains(&n) {
            return Err(CaptureError::CorruptFrame("scripted bad JPEG".into()));
        }
        if self.remaining == 0 {
            return Err(CaptureError::CaptureFailed("scripted end of stream".into()));
        }
        self.remaining -= 1;
        let frame = &self.frame;
        Ok(Frame::with_sequence(
            frame.data.clone(),
            frame.width(),
            frame.height(),
            frame.format(),
            n as u64,
        ))
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Advances by a fixed list of offsets (milliseconds from the first reading).
struct ScriptedClock {
    base: Instant,
    offsets: VecDeque<u64>,
    last: u64,
}

impl ScriptedClock {
    fn new(offsets_ms: &[u64]) -> Self {
        Self {
            base: Instant::now(),
            offsets: offsets_ms.iter().copied().collect(),
            last: 0,
        }
    }
}

impl Clock for ScriptedClock {
    fn now(&mut self) -> Instant {
        if let Some(next) = self.offsets.pop_front() {
            self.last = next;
        }
        self.base + Duration::from_millis(self.last)
    }
}

enum Behaviour {
    Nothing,
    AlwaysFace,
    Fail,
    Panic,
}

struct ScriptedDetector(Behaviour);

impl Detector for ScriptedDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Face
    }

    fn needs_color(&self) -> bool {
        true
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionEvent>, DetectError> {
        match self.0 {
            Behaviour::Nothing => Ok(Vec::new()),
            Behaviour::AlwaysFace => Ok(vec![DetectionEvent {
                bbox: Rect::new(2, 2, frame.width() / 2, frame.height() / 2),
                payload: Payload::Face,
            }]),
            Behaviour::Fail => Err(DetectError::Backend("scripted failure".into())),
            Behaviour::Panic => panic!("scripted detector panic"),
        }
    }
}

fn test_config(dir: &TempDir, cadence: u64) -> Config {
    let mut config = Config::default();
    config.preprocess.width = 0;
    config.preprocess.height = 0;
    config.persistence.output_dir = Some(dir.path().to_path_buf());
    config.persistence.cadence = cadence;
    config.persistence.queue_depth = 64;
    config
}

#[test]
fn instantaneous_fps_follows_frame_deltas() {
    let dir = TempDir::new().unwrap();
    let (source, _, _) = ScriptedSource::new(4);
    let clock = ScriptedClock::new(&[0, 100, 200, 200, 300]);
    let mut pipeline = PipelineLoop::with_clock(
        &test_config(&dir, 5),
        source,
        ScriptedDetector(Behaviour::Nothing),
        clock,
    )
    .unwrap();

    pipeline.start().unwrap();
    let fps: Vec<f64> = (0..4).map(|_| pipeline.step().unwrap().fps).collect();

    for (got, want) in fps.iter().zip([10.0, 10.0, 0.0, 10.0]) {
        assert!((got - want).abs() < 1e-9, "{fps:?}");
    }
}

#[test]
fn read_failure_closes_source_once_and_stops_reading() {
    let dir = TempDir::new().unwrap();
    let (source, reads, closes) = ScriptedSource::new(7);
    let mut pipeline =
        PipelineLoop::new(&test_config(&dir, 5), source, ScriptedDetector(Behaviour::Nothing)).unwrap();

    let summary = pipeline.run(&AtomicBool::new(false)).unwrap();

    assert!(matches!(summary.stop_reason, StopReason::CaptureFailed(_)));
    assert_eq!(summary.iterations, 7);
    assert_eq!(reads.load(Ordering::SeqCst), 8);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    // Terminal: no more reads, no second close
    assert!(matches!(pipeline.step(), Err(PipelineError::AlreadyStopped)));
    assert!(matches!(
        pipeline.run(&AtomicBool::new(false)),
        Err(PipelineError::AlreadyStopped)
    ));
    pipeline.shutdown(StopReason::Interrupted);
    assert_eq!(reads.load(Ordering::SeqCst), 8);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn interrupt_is_observed_before_reading() {
    let dir = TempDir::new().unwrap();
    let (source, reads, closes) = ScriptedSource::new(100);
    let mut pipeline =
        PipelineLoop::new(&test_config(&dir, 5), source, ScriptedDetector(Behaviour::AlwaysFace)).unwrap();

    let summary = pipeline.run(&AtomicBool::new(true)).unwrap();

    assert_eq!(summary.stop_reason, StopReason::Interrupted);
    assert_eq!(summary.iterations, 0);
    assert_eq!(reads.load(Ordering::SeqCst), 0);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn sustained_detection_persists_on_cadence() {
    let dir = TempDir::new().unwrap();
    let (source, _, _) = ScriptedSource::new(23);
    let mut pipeline =
        PipelineLoop::new(&test_config(&dir, 5), source, ScriptedDetector(Behaviour::AlwaysFace)).unwrap();

    let summary = pipeline.run(&AtomicBool::new(false)).unwrap();

    // Iterations 0, 5, 10, 15, 20
    assert_eq!(summary.persisted, 5);
    assert_eq!(summary.persistence.written, 5);
    assert_eq!(summary.persistence.dropped, 0);
    for n in 1..=5 {
        let path = dir.path().join(format!("face_detected_{n}.jpg"));
        assert!(std::fs::metadata(&path).unwrap().len() > 0, "{}", path.display());
    }
    assert!(!dir.path().join("face_detected_6.jpg").exists());
}

#[test]
fn cadence_one_persists_every_detecting_frame() {
    let dir = TempDir::new().unwrap();
    let (source, _, _) = ScriptedSource::new(6);
    let mut pipeline =
        PipelineLoop::new(&test_config(&dir, 1), source, ScriptedDetector(Behaviour::AlwaysFace)).unwrap();

    let summary = pipeline.run(&AtomicBool::new(false)).unwrap();
    assert_eq!(summary.persisted, 6);
    assert_eq!(summary.persistence.written, 6);
}

#[test]
fn failing_detector_does_not_stop_the_loop() {
    let dir = TempDir::new().unwrap();
    let (source, _, _) = ScriptedSource::new(10);
    let mut pipeline =
        PipelineLoop::new(&test_config(&dir, 1), source, ScriptedDetector(Behaviour::Fail)).unwrap();

    let summary = pipeline.run(&AtomicBool::new(false)).unwrap();
    assert_eq!(summary.iterations, 10);
    assert_eq!(summary.persisted, 0);
}

#[test]
fn panicking_detector_is_treated_as_empty() {
    let dir = TempDir::new().unwrap();
    let (source, _, _) = ScriptedSource::new(3);
    let mut pipeline =
        PipelineLoop::new(&test_config(&dir, 1), source, ScriptedDetector(Behaviour::Panic)).unwrap();

    let summary = pipeline.run(&AtomicBool::new(false)).unwrap();
    assert_eq!(summary.iterations, 3);
    assert_eq!(summary.persisted, 0);
}

#[test]
fn windowed_average_reported_every_fifth_iteration_once_full() {
    let dir = TempDir::new().unwrap();
    let (source, _, _) = ScriptedSource::new(60);
    let offsets: Vec<u64> = (0..=60).map(|i| i * 20).collect();
    let mut pipeline = PipelineLoop::with_clock(
        &test_config(&dir, 5),
        source,
        ScriptedDetector(Behaviour::Nothing),
        ScriptedClock::new(&offsets),
    )
    .unwrap();

    pipeline.start().unwrap();
    let reports: Vec<_> = (0..60).map(|_| pipeline.step().unwrap()).collect();

    let with_average: Vec<u64> = reports
        .iter()
        .filter(|r| r.average_fps.is_some())
        .map(|r| r.index)
        .collect();
    assert_eq!(with_average, vec![49, 54, 59]);
    let avg = reports[49].average_fps.unwrap();
    assert!((avg - 50.0).abs() < 1e-6, "{avg}");
    assert_eq!(pipeline.rate().len(), 50);
}

/// 640x480 grey frame with a 40x40 red square, 1600 px at full resolution
fn red_square_frame() -> Frame {
    let (width, height) = (640usize, 480usize);
    let mut data = vec![90u8; width * height * 3];
    for y in 200..240 {
        for x in 300..340 {
            let i = (y * width + x) * 3;
            data[i..i + 3].copy_from_slice(&[220, 20, 20]);
        }
    }
    Frame::new(data, width as u32, height as u32, PixelFormat::Rgb24)
}

#[test]
fn color_threshold_applies_at_capture_resolution() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.persistence.output_dir = Some(dir.path().to_path_buf());
    assert_eq!((config.preprocess.width, config.preprocess.height), (320, 240));

    let (source, _, _) = ScriptedSource::with_frame(1, red_square_frame());
    let mut pipeline = PipelineLoop::new(&config, source, ColorRegionDetector::default()).unwrap();

    let summary = pipeline.run(&AtomicBool::new(false)).unwrap();
    assert_eq!(summary.persisted, 1);
    assert_eq!(summary.persistence.written, 2);
    assert!(dir.path().join("red_detected_0.jpg").exists());
    assert!(dir.path().join("contours_0.jpg").exists());
}

#[test]
fn corrupt_frames_are_skipped_without_counting_an_iteration() {
    let dir = TempDir::new().unwrap();
    let (source, reads, _) = ScriptedSource::new(3);
    let source = source.corrupt_on([1, 2]);
    let mut pipeline =
        PipelineLoop::new(&test_config(&dir, 5), source, ScriptedDetector(Behaviour::Nothing)).unwrap();

    let summary = pipeline.run(&AtomicBool::new(false)).unwrap();

    assert_eq!(summary.iterations, 3);
    assert!(matches!(summary.stop_reason, StopReason::CaptureFailed(_)));
    // 3 good + 2 corrupt + the failing read
    assert_eq!(reads.load(Ordering::SeqCst), 6);
}

#[test]
fn endless_corruption_eventually_stops_the_loop() {
    let dir = TempDir::new().unwrap();
    let (source, reads, closes) = ScriptedSource::new(100);
    let source = source.corrupt_on(0..1000);
    let mut pipeline =
        PipelineLoop::new(&test_config(&dir, 5), source, ScriptedDetector(Behaviour::Nothing)).unwrap();

    let summary = pipeline.run(&AtomicBool::new(false)).unwrap();

    assert_eq!(summary.iterations, 0);
    match summary.stop_reason {
        StopReason::CaptureFailed(reason) => assert!(reason.contains("corrupt"), "{reason}"),
        other => panic!("unexpected stop {other:?}"),
    }
    assert_eq!(reads.load(Ordering::SeqCst), MAX_CORRUPT_FRAMES as usize + 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}
