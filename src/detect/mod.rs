//! Pluggable per-frame detectors.
//!
//! Every detector consumes a prepared frame by shared reference and reports
//! events in *prepared-frame* coordinates. Consumers that draw on or crop the
//! full-resolution frame map rectangles back with [`Rect::scaled`].

pub mod barcode;
pub mod color;
pub mod face;

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capture::{Frame, PixelFormat};
use crate::error::{DetectError, PipelineError};
use crate::preprocess::Scale;
use crate::DetectorConfig;

pub use barcode::BarcodeDetector;
pub use color::{ColorRegionDetector, DEFAULT_MIN_AREA};
pub use face::{FaceDetector, FaceLocator, SeetaLocator};

/// Axis-aligned rectangle in pixel units, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Map a prepared-frame rectangle onto the source frame.
    pub fn scaled(&self, scale: Scale) -> Rect {
        Rect {
            x: (self.x as f32 * scale.x).round() as u32,
            y: (self.y as f32 * scale.y).round() as u32,
            width: (self.width as f32 * scale.x).round() as u32,
            height: (self.height as f32 * scale.y).round() as u32,
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@({},{})", self.width, self.height, self.x, self.y)
    }
}

/// Detector-specific event content
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Decoded barcode text
    Barcode { text: String },
    /// Thresholded color blob of `area` pixels
    ColorRegion { area: u32 },
    /// A located face
    Face,
}

/// One detection within one frame
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    /// Bounding box in prepared-frame coordinates
    pub bbox: Rect,
    pub payload: Payload,
}

impl DetectionEvent {
    /// Short human-readable description for the console.
    pub fn summary(&self) -> String {
        match &self.payload {
            Payload::Barcode { text } => format!("QR Code: {text}"),
            Payload::ColorRegion { area } => format!("red region, area {area} px at {}", self.bbox),
            Payload::Face => format!("face at {}", self.bbox),
        }
    }
}

/// All events produced for one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
    events: Vec<DetectionEvent>,
}

impl DetectionSet {
    pub fn new(events: Vec<DetectionEvent>) -> Self {
        Self { events }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// True iff at least one event fired
    pub fn is_present(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectionEvent> {
        self.events.iter()
    }
}

/// Which detector a pipeline runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Barcode,
    ColorRegion,
    Face,
}

impl DetectorKind {
    /// Output directory used when none is configured.
    pub fn default_output_dir(self) -> &'static str {
        match self {
            DetectorKind::Barcode => "qr-images",
            DetectorKind::ColorRegion => "color-images",
            DetectorKind::Face => "face-images",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DetectorKind::Barcode => "barcode",
            DetectorKind::ColorRegion => "color_region",
            DetectorKind::Face => "face",
        })
    }
}

/// A swappable detection capability.
///
/// Detectors need not be `Send`; build one on the thread that runs the loop.
pub trait Detector {
    fn kind(&self) -> DetectorKind;

    /// Whether the detector reads color; otherwise frames are reduced to grayscale first.
    fn needs_color(&self) -> bool;

    /// Whether the detector must see the frame at capture resolution.
    fn full_resolution(&self) -> bool {
        false
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionEvent>, DetectError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn kind(&self) -> DetectorKind {
        (**self).kind()
    }

    fn needs_color(&self) -> bool {
        (**self).needs_color()
    }

    fn full_resolution(&self) -> bool {
        (**self).full_resolution()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionEvent>, DetectError> {
        (**self).detect(frame)
    }
}

/// Build the configured detector.
///
/// Face mode loads its cascade model from `detector.face_model`; other
/// [`FaceLocator`] backends can be wrapped in a [`FaceDetector`] directly.
pub fn build(config: &DetectorConfig) -> Result<Box<dyn Detector>, PipelineError> {
    match config.kind {
        DetectorKind::Barcode => Ok(Box::new(BarcodeDetector::new())),
        DetectorKind::ColorRegion => Ok(Box::new(ColorRegionDetector::new(config.min_region_area))),
        DetectorKind::Face => {
            let model = config.face_model.as_deref().ok_or_else(|| {
                PipelineError::Config("face detection needs detector.face_model".into())
            })?;
            let locator = SeetaLocator::load(model, config.min_face_size)?;
            Ok(Box::new(FaceDetector::new(locator, config.min_face_size)))
        }
    }
}

/// Borrow or compute the single-channel luma plane of a frame.
pub(crate) fn luma_plane(frame: &Frame) -> Result<Cow<'_, [u8]>, DetectError> {
    let expected = frame.expected_len();
    if frame.data.len() != expected {
        return Err(DetectError::MalformedFrame {
            expected,
            actual: frame.data.len(),
        });
    }
    match frame.format() {
        PixelFormat::Gray8 => Ok(Cow::Borrowed(&frame.data[..])),
        PixelFormat::Rgb24 => Ok(Cow::Owned(
            frame
                .data
                .chunks_exact(3)
                .map(|px| {
                    let luma = 299 * u32::from(px[0]) + 587 * u32::from(px[1]) + 114 * u32::from(px[2]);
                    ((luma + 500) / 1000) as u8
                })
                .collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_scales_back_to_source() {
        let rect = Rect::new(10, 20, 30, 40);
        assert_eq!(rect.scaled(Scale { x: 2.0, y: 2.0 }), Rect::new(20, 40, 60, 80));
        assert_eq!(rect.scaled(Scale::IDENTITY), rect);
    }

    #[test]
    fn presence_follows_event_count() {
        assert!(!DetectionSet::empty().is_present());
        let set = DetectionSet::new(vec![DetectionEvent {
            bbox: Rect::new(0, 0, 1, 1),
            payload: Payload::Face,
        }]);
        assert!(set.is_present());
    }

    #[test]
    fn luma_of_rgb_frame_is_weighted() {
        let frame = Frame::new(vec![255u8, 255, 255, 0, 0, 0], 2, 1, PixelFormat::Rgb24);
        assert_eq!(&luma_plane(&frame).unwrap()[..], &[255, 0]);
    }

    fn face_config(face_model: Option<std::path::PathBuf>) -> DetectorConfig {
        DetectorConfig {
            kind: DetectorKind::Face,
            face_model,
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn face_mode_requires_a_model_path() {
        let err = build(&face_config(None)).err().unwrap();
        assert!(matches!(err, PipelineError::Config(ref msg) if msg.contains("face_model")));
    }

    #[test]
    fn unreadable_face_model_is_a_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("seeta_fd_frontal_v1.0.bin");
        let err = build(&face_config(Some(missing))).err().unwrap();
        assert!(matches!(err, PipelineError::Config(ref msg) if msg.contains("seeta_fd_frontal")));
    }

    #[test]
    fn only_color_regions_need_full_resolution() {
        let config = |kind| DetectorConfig {
            kind,
            ..DetectorConfig::default()
        };
        assert!(!build(&config(DetectorKind::Barcode)).unwrap().full_resolution());
        assert!(build(&config(DetectorKind::ColorRegion)).unwrap().full_resolution());
    }
}
