//! The capture → prepare → detect → gate → persist loop.
//!
//! Everything on the hot path runs sequentially on the calling thread; only
//! file writes leave it. The stop flag is polled at the top of each iteration,
//! so the iteration in flight always completes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{error, info, warn};

use super::export::Exporter;
use super::gate::EventGate;
use super::persist::{Enqueued, PersistenceReport, PersistenceWorker};
use super::rate::{RateTracker, AVERAGE_INTERVAL, WINDOW_CAPACITY};
use crate::capture::{Frame, FrameSource};
use crate::detect::{DetectionSet, Detector};
use crate::error::{CaptureError, PipelineError, Result};
use crate::preprocess::{Preprocessor, Scale};
use crate::Config;

/// Consecutive undecodable frames tolerated within one iteration
pub const MAX_CORRUPT_FRAMES: u32 = 30;

/// Time source for frame deltas
pub trait Clock {
    fn now(&mut self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&mut self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Interrupted,
    CaptureFailed(String),
}

/// Per-iteration telemetry
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    pub index: u64,
    /// Seconds since the previous iteration started
    pub delta: f64,
    pub fps: f64,
    /// Set every few iterations once the rolling window is full
    pub average_fps: Option<f64>,
    pub detections: usize,
    pub persisted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub iterations: u64,
    /// Iterations whose detections were handed to persistence
    pub persisted: u64,
    pub stop_reason: StopReason,
    pub persistence: PersistenceReport,
}

pub struct PipelineLoop<S, D, C = SystemClock> {
    state: PipelineState,
    source: S,
    detector: D,
    clock: C,
    preprocessor: Preprocessor,
    gate: EventGate,
    exporter: Exporter,
    worker: PersistenceWorker,
    rate: RateTracker,
    iteration: u64,
    persisted: u64,
    previous: Option<Instant>,
}

impl<S: FrameSource, D: Detector> PipelineLoop<S, D, SystemClock> {
    pub fn new(config: &Config, source: S, detector: D) -> Result<Self> {
        Self::with_clock(config, source, detector, SystemClock)
    }
}

impl<S: FrameSource, D: Detector, C: Clock> PipelineLoop<S, D, C> {
    pub fn with_clock(config: &Config, source: S, detector: D, clock: C) -> Result<Self> {
        config.validate()?;

        let kind = detector.kind();
        let mut preprocessor = Preprocessor::new(&config.preprocess, !detector.needs_color());
        if detector.full_resolution() {
            preprocessor = preprocessor.without_resize();
        }
        let gate = EventGate::new(config.persistence.cadence)?;
        let exporter = Exporter::new(kind, config.output_dir())?;
        let worker = PersistenceWorker::spawn(config.persistence.workers, config.persistence.queue_depth)?;

        info!(
            detector = %kind,
            cadence = gate.cadence(),
            output = %exporter.output_dir().display(),
            "Pipeline ready"
        );

        Ok(Self {
            state: PipelineState::Idle,
            source,
            detector,
            clock,
            preprocessor,
            gate,
            exporter,
            worker,
            rate: RateTracker::new(),
            iteration: 0,
            persisted: 0,
            previous: None,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn iterations(&self) -> u64 {
        self.iteration
    }

    pub fn rate(&self) -> &RateTracker {
        &self.rate
    }

    /// Idle → Running. The first frame delta is measured from here.
    pub fn start(&mut self) -> Result<()> {
        if self.state != PipelineState::Idle {
            return Err(PipelineError::AlreadyStopped);
        }
        self.previous = Some(self.clock.now());
        self.state = PipelineState::Running;
        Ok(())
    }

    /// Run until `stop` is raised or a capture fails, then shut down.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<RunSummary> {
        self.start()?;

        let reason = loop {
            if stop.load(Ordering::SeqCst) {
                info!("Stopping detection...");
                break StopReason::Interrupted;
            }
            if let Err(e) = self.step() {
                error!("{}", e);
                break StopReason::CaptureFailed(e.to_string());
            }
        };

        Ok(self.shutdown(reason))
    }

    /// One full iteration. A capture failure moves the loop to `Stopping`.
    pub fn step(&mut self) -> Result<IterationReport> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::AlreadyStopped);
        }

        let t1 = self.clock.now();
        let frame = match self.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.state = PipelineState::Stopping;
                return Err(e.into());
            }
        };
        metrics::counter!("lookout_frames_total").increment(1);

        let (detections, scale) = self.detect(&frame);
        for event in detections.iter() {
            info!("Detected {}", event.summary());
        }
        if detections.is_present() {
            metrics::counter!("lookout_detections_total").increment(detections.len() as u64);
        }

        let persisted = self.gate.should_persist(self.iteration, detections.is_present());
        if persisted {
            self.persist(&frame, &detections, scale);
        }

        let previous = self.previous.replace(t1).unwrap_or(t1);
        let delta = t1.saturating_duration_since(previous).as_secs_f64();
        self.rate.record_sample(delta);
        let fps = self.rate.instantaneous();
        metrics::gauge!("lookout_fps").set(fps);
        info!("Frame Time: {:.4} sec | FPS: {:.2}", delta, fps);

        let index = self.iteration;
        self.iteration += 1;

        let average_fps = if self.iteration % AVERAGE_INTERVAL == 0 {
            self.rate.windowed_average()
        } else {
            None
        };
        if let Some(avg) = average_fps {
            info!("Avg FPS over last {} frames: {:.2}", WINDOW_CAPACITY, avg);
        }

        Ok(IterationReport {
            index,
            delta,
            fps,
            average_fps,
            detections: detections.len(),
            persisted,
        })
    }

    /// Release the source and drain persistence. Terminal.
    pub fn shutdown(&mut self, reason: StopReason) -> RunSummary {
        if self.state != PipelineState::Stopped {
            self.state = PipelineState::Stopping;
            self.source.close();
            let persistence = self.worker.shutdown();
            self.state = PipelineState::Stopped;
            info!(
                iterations = self.iteration,
                saved = persistence.written,
                failed = persistence.failed,
                dropped = persistence.dropped,
                "Camera released"
            );
        }

        RunSummary {
            iterations: self.iteration,
            persisted: self.persisted,
            stop_reason: reason,
            persistence: self.worker.report(),
        }
    }

    /// Next frame, skipping up to [`MAX_CORRUPT_FRAMES`] undecodable ones in a row.
    fn read_frame(&mut self) -> std::result::Result<Frame, CaptureError> {
        let mut skipped = 0;
        loop {
            match self.source.next_frame() {
                Err(CaptureError::CorruptFrame(reason)) if skipped < MAX_CORRUPT_FRAMES => {
                    skipped += 1;
                    metrics::counter!("lookout_frames_corrupt_total").increment(1);
                    warn!("Skipping corrupt frame: {}", reason);
                }
                other => return other,
            }
        }
    }

    /// Prepare and detect. Detector errors and panics yield an empty set.
    fn detect(&mut self, frame: &Frame) -> (DetectionSet, Scale) {
        let prepared = match self.preprocessor.prepare(frame) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Preprocessing failed, skipping detection: {}", e);
                return (DetectionSet::empty(), Scale::IDENTITY);
            }
        };

        let detector = &mut self.detector;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(&prepared.frame)));
        let events = match outcome {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                warn!("Detector failed: {}", e);
                Vec::new()
            }
            Err(_) => {
                warn!("Detector panicked, treating frame as empty");
                Vec::new()
            }
        };

        (DetectionSet::new(events), prepared.scale)
    }

    fn persist(&mut self, frame: &Frame, detections: &DetectionSet, scale: Scale) {
        self.persisted += 1;
        for task in self.exporter.tasks(frame, detections, scale, self.iteration) {
            if self.worker.enqueue(task) == Enqueued::Closed {
                break;
            }
        }
    }
}
