//! V4L2 capture over memory-mapped driver buffers

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::decoder::{decode_frame, CaptureFormat};
use super::frame::{Frame, FrameMetadata};
use super::FrameSource;
use crate::error::CaptureError;
use crate::utils;
use crate::CaptureConfig;

/// Camera frame source backed by a V4L2 device node
pub struct V4l2Capture {
    device: Option<Device>,
    stream: Option<MmapStream<'static>>,
    path: String,
    width: u32,
    height: u32,
    format: CaptureFormat,
    sequence: u64,
}

impl V4l2Capture {
    /// Open the device, negotiate format/size/rate and start streaming.
    ///
    /// Negotiation is best-effort: whatever the driver settles on is read back and
    /// used for decoding. Only a failed open or stream start is an error.
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let path = utils::resolve_device(&config.device)?;
        info!("Initializing V4L2 capture: {}", path);

        let unavailable = |reason: String| CaptureError::DeviceUnavailable {
            device: path.clone(),
            reason,
        };

        let device = Device::with_path(&path).map_err(|e| unavailable(e.to_string()))?;

        let caps = device.query_caps().map_err(|e| unavailable(e.to_string()))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(unavailable("device doesn't support video capture".into()));
        }

        let (width, height, format) = negotiate_format(&device, config);

        if config.fps > 0 {
            match device.set_params(&Parameters::with_fps(config.fps)) {
                Ok(params) => debug!("Frame interval negotiated: {:?}", params.interval),
                Err(e) => warn!("Device ignored fps hint {}: {}", config.fps, e),
            }
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
            .map_err(|e| unavailable(format!("failed to start stream: {e}")))?;
        info!(
            "Capture stream started: {}x{} {:?} with {} buffers",
            width, height, format, config.buffer_count
        );

        Ok(Self {
            device: Some(device),
            stream: Some(stream),
            path,
            width,
            height,
            format,
            sequence: 0,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Apply the configured format and read back what the driver actually chose.
fn negotiate_format(device: &Device, config: &CaptureConfig) -> (u32, u32, CaptureFormat) {
    let requested = (config.width, config.height, config.format);

    let mut fmt = match device.format() {
        Ok(fmt) => fmt,
        Err(e) => {
            warn!("Could not query current format, assuming requested: {}", e);
            return requested;
        }
    };
    fmt.width = config.width;
    fmt.height = config.height;
    fmt.fourcc = FourCC::new(&config.format.fourcc());

    let actual = match device.set_format(&fmt) {
        Ok(actual) => actual,
        Err(e) => {
            warn!("Device rejected format request: {}", e);
            fmt
        }
    };

    let format = match CaptureFormat::from_fourcc(actual.fourcc.repr) {
        Some(format) => format,
        None => {
            warn!(
                "Device settled on unsupported fourcc {}, decoding as {:?}",
                actual.fourcc, config.format
            );
            config.format
        }
    };

    if (actual.width, actual.height, format) != requested {
        warn!(
            "Requested {}x{} {:?}, device delivers {}x{} {:?}",
            config.width, config.height, config.format, actual.width, actual.height, format
        );
    }

    (actual.width, actual.height, format)
}

impl FrameSource for V4l2Capture {
    #[instrument(skip(self), fields(device = %self.path))]
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let timestamp = Instant::now();

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CaptureError::CaptureFailed("stream is closed".into()))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;

        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Err(CaptureError::CaptureFailed("device returned no data".into()));
        }

        let decoded = decode_frame(&buf[..used], self.format, self.width, self.height)?;
        let device_timestamp = Duration::from_secs(meta.timestamp.sec.max(0) as u64)
            + Duration::from_micros(meta.timestamp.usec.max(0) as u64);

        self.sequence += 1;

        Ok(Frame {
            data: Bytes::from(decoded.pixels),
            meta: Arc::new(FrameMetadata {
                sequence: self.sequence,
                width: decoded.width,
                height: decoded.height,
                format: decoded.format,
                device_timestamp: Some(device_timestamp),
            }),
            timestamp,
        })
    }

    fn close(&mut self) {
        // Stream first: its buffers are unmapped before the handle goes away.
        let had_stream = self.stream.take().is_some();
        let had_device = self.device.take().is_some();
        if had_stream || had_device {
            info!("Released capture device {}", self.path);
        }
    }
}

impl Drop for V4l2Capture {
    fn drop(&mut self) {
        self.close();
    }
}
