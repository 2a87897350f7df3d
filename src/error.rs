use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a frame source.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The capture device could not be opened or started. Fatal at startup.
    #[error("capture device unavailable: {device}: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    /// A read returned no usable data. Fatal to the loop, never retried.
    #[error("frame capture failed: {0}")]
    CaptureFailed(String),

    /// A read returned data that would not decode. The loop skips the frame.
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),
}

/// Errors raised by a detector. Never fatal: the iteration continues with no events.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("detector expected {expected} input, got {actual}")]
    UnsupportedFormat {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    MalformedFrame { expected: usize, actual: usize },

    #[error("detector backend failed: {0}")]
    Backend(String),
}

/// Errors raised while writing a single artifact. Recovered locally by the worker.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("frame {width}x{height} does not match its buffer ({len} bytes)")]
    BufferMismatch { width: u32, height: u32, len: usize },

    #[error("unsupported image extension for {0}")]
    UnknownFormat(PathBuf),
}

/// Top-level pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn persistence worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("pipeline already ran; a stopped loop cannot be restarted")]
    AlreadyStopped,
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
