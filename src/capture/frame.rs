use bytes::Bytes;
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frame data with zero-copy semantics
///
/// Pixel bytes are immutable; cloning a frame shares the buffer, which is how the
/// persistence worker receives its copy without stalling the loop.
#[derive(Clone)]
pub struct Frame {
    /// Tightly packed pixel rows (`width * channels` bytes per row)
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Decoded pixel layouts the pipeline works with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Gray8,
    Rgb24,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb24 => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Gray8 => "gray8",
            PixelFormat::Rgb24 => "rgb24",
        }
    }
}

impl Frame {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self::with_sequence(data, width, height, format, 0)
    }

    pub fn with_sequence(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
    ) -> Self {
        Self {
            data: data.into(),
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                format,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        }
    }

    pub fn from_rgb(image: RgbImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self::with_sequence(image.into_raw(), width, height, PixelFormat::Rgb24, sequence)
    }

    pub fn from_gray(image: GrayImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self::with_sequence(image.into_raw(), width, height, PixelFormat::Gray8, sequence)
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    pub fn expected_len(&self) -> usize {
        self.meta.width as usize * self.meta.height as usize * self.meta.format.channels()
    }

    /// Copy into an owned RGB image, expanding grayscale if needed.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        if self.data.len() != self.expected_len() {
            return None;
        }
        match self.meta.format {
            PixelFormat::Rgb24 => RgbImage::from_raw(self.width(), self.height(), self.data.to_vec()),
            PixelFormat::Gray8 => {
                let rgb = self.data.iter().flat_map(|&v| [v, v, v]).collect();
                RgbImage::from_raw(self.width(), self.height(), rgb)
            }
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("format", &self.meta.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}
