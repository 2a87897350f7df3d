//! Background image persistence.
//!
//! The capture loop hands finished frames to a fixed pool of writer threads
//! through a bounded MPMC queue. Enqueueing never blocks: when the queue is full
//! the newest task is dropped and counted. Each file is encoded in memory,
//! written under a temporary name and renamed into place, so readers never see
//! a partial image.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::utils::CachePadded;
use flume::{Receiver, Sender, TrySendError};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use tracing::{debug, error, info, warn};

use crate::capture::{Frame, PixelFormat};
use crate::error::{PersistError, PipelineError};

/// A frame and where it should end up. Owned by the worker once enqueued.
#[derive(Debug)]
pub struct PersistenceTask {
    pub frame: Frame,
    pub path: PathBuf,
}

impl PersistenceTask {
    pub fn new(frame: Frame, path: impl Into<PathBuf>) -> Self {
        Self {
            frame,
            path: path.into(),
        }
    }
}

/// What happened to an enqueue request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// Queue at its ceiling; task discarded
    Dropped,
    /// Worker already shut down; task discarded
    Closed,
}

/// Totals after the worker has drained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistenceReport {
    pub written: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Stats {
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

type Writer = dyn Fn(&PersistenceTask) -> Result<(), PersistError> + Send + Sync;

pub struct PersistenceWorker {
    tx: Option<Sender<PersistenceTask>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<CachePadded<Stats>>,
}

impl PersistenceWorker {
    /// Start `workers` writer threads sharing a queue of at most `queue_depth` tasks.
    pub fn spawn(workers: usize, queue_depth: usize) -> Result<Self, PipelineError> {
        Self::spawn_with(workers, queue_depth, Arc::new(|task: &PersistenceTask| {
            write_atomic(&task.frame, &task.path)
        }))
    }

    fn spawn_with(workers: usize, queue_depth: usize, write: Arc<Writer>) -> Result<Self, PipelineError> {
        if workers == 0 || queue_depth == 0 {
            return Err(PipelineError::Config(
                "persistence needs at least one worker and a non-empty queue".into(),
            ));
        }

        let (tx, rx) = flume::bounded::<PersistenceTask>(queue_depth);
        let stats = Arc::new(CachePadded::new(Stats::default()));

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let rx = rx.clone();
            let stats = Arc::clone(&stats);
            let write = Arc::clone(&write);
            let handle = thread::Builder::new()
                .name(format!("lookout-save-{i}"))
                .spawn(move || drain(rx, stats, write))
                .map_err(PipelineError::WorkerSpawn)?;
            handles.push(handle);
        }
        debug!(workers, queue_depth, "Persistence worker pool started");

        Ok(Self {
            tx: Some(tx),
            workers: handles,
            stats,
        })
    }

    /// Hand a task to the pool without blocking.
    pub fn enqueue(&self, task: PersistenceTask) -> Enqueued {
        let Some(tx) = self.tx.as_ref() else {
            warn!("Persistence stopped, discarding {}", task.path.display());
            return Enqueued::Closed;
        };

        match tx.try_send(task) {
            Ok(()) => Enqueued::Queued,
            Err(TrySendError::Full(task)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("lookout_saves_dropped_total").increment(1);
                warn!("Save queue full, dropping {}", task.path.display());
                Enqueued::Dropped
            }
            Err(TrySendError::Disconnected(task)) => {
                warn!("Persistence stopped, discarding {}", task.path.display());
                Enqueued::Closed
            }
        }
    }

    pub fn queued(&self) -> usize {
        self.tx.as_ref().map_or(0, |tx| tx.len())
    }

    /// Stop accepting tasks, let the pool finish what is already queued, and join it.
    ///
    /// Safe to call more than once; later calls just return the totals.
    pub fn shutdown(&mut self) -> PersistenceReport {
        if self.tx.take().is_some() {
            let pending = self.workers.len();
            for handle in self.workers.drain(..) {
                if handle.join().is_err() {
                    error!("Persistence worker panicked");
                }
            }
            debug!(workers = pending, "Persistence worker pool stopped");
        }
        self.report()
    }

    pub fn report(&self) -> PersistenceReport {
        PersistenceReport {
            written: self.stats.written.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn drain(rx: Receiver<PersistenceTask>, stats: Arc<CachePadded<Stats>>, write: Arc<Writer>) {
    // recv fails only once every sender is gone and the queue is empty
    while let Ok(task) = rx.recv() {
        match write(&task) {
            Ok(()) => {
                stats.written.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("lookout_saves_total").increment(1);
                info!("Saved image: {}", task.path.display());
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("lookout_save_failures_total").increment(1);
                error!("Failed to save image: {}", e);
            }
        }
    }
}

/// Encode `frame` in the format implied by the extension and move it into place.
pub fn write_atomic(frame: &Frame, path: &Path) -> Result<(), PersistError> {
    let format =
        ImageFormat::from_path(path).map_err(|_| PersistError::UnknownFormat(path.to_path_buf()))?;
    let image = to_dynamic(frame)?;

    let mut encoded = Cursor::new(Vec::new());
    image
        .write_to(&mut encoded, format)
        .map_err(|source| PersistError::Encode {
            path: path.to_path_buf(),
            source,
        })?;

    let tmp_path = temp_path(path);
    let io_err = |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };

    std::fs::write(&tmp_path, encoded.get_ref()).map_err(io_err)?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(io_err(e));
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

fn to_dynamic(frame: &Frame) -> Result<DynamicImage, PersistError> {
    let mismatch = || PersistError::BufferMismatch {
        width: frame.width(),
        height: frame.height(),
        len: frame.data.len(),
    };
    let pixels = frame.data.to_vec();
    match frame.format() {
        PixelFormat::Rgb24 => RgbImage::from_raw(frame.width(), frame.height(), pixels)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(mismatch),
        PixelFormat::Gray8 => GrayImage::from_raw(frame.width(), frame.height(), pixels)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(mismatch),
    }
}
