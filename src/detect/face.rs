use std::path::Path;

use rustface::ImageData;
use tracing::info;

use super::{luma_plane, DetectionEvent, Detector, DetectorKind, Payload, Rect};
use crate::capture::Frame;
use crate::error::{DetectError, PipelineError};

/// Smallest window the SeetaFace cascade accepts
const SEETA_MIN_WINDOW: u32 = 20;
/// Pyramid step between scales (1 / 1.3)
const PYRAMID_SCALE: f32 = 0.77;
const SCORE_THRESHOLD: f64 = 2.0;
const SLIDE_STEP: u32 = 4;

/// Face localisation backend (cascade, CNN, ...).
///
/// Implementations may be stateful (e.g., tracking across frames),
/// hence `&mut self`.
pub trait FaceLocator {
    /// Locate faces in a row-major grayscale buffer of `width` × `height` bytes.
    fn locate(&mut self, gray: &[u8], width: u32, height: u32) -> Result<Vec<Rect>, DetectError>;
}

/// SeetaFace funnel cascade loaded from a model file at startup.
pub struct SeetaLocator {
    detector: Box<dyn rustface::Detector>,
}

impl SeetaLocator {
    pub fn load(model: &Path, min_face_size: u32) -> Result<Self, PipelineError> {
        let path = model.to_str().ok_or_else(|| {
            PipelineError::Config(format!("face model path {} is not valid UTF-8", model.display()))
        })?;
        let mut detector = rustface::create_detector(path).map_err(|e| {
            PipelineError::Config(format!("failed to load face model {}: {}", model.display(), e))
        })?;

        detector.set_min_face_size(min_face_size.max(SEETA_MIN_WINDOW));
        detector.set_score_thresh(SCORE_THRESHOLD);
        detector.set_pyramid_scale_factor(PYRAMID_SCALE);
        detector.set_slide_window_step(SLIDE_STEP, SLIDE_STEP);
        info!("Loaded face model {}", model.display());

        Ok(Self { detector })
    }
}

impl FaceLocator for SeetaLocator {
    fn locate(&mut self, gray: &[u8], width: u32, height: u32) -> Result<Vec<Rect>, DetectError> {
        let mut image = ImageData::new(gray, width, height);
        Ok(self
            .detector
            .detect(&mut image)
            .into_iter()
            .map(|face| {
                let bbox = face.bbox();
                let (x, y) = (bbox.x().max(0) as u32, bbox.y().max(0) as u32);
                Rect::new(
                    x,
                    y,
                    bbox.width().min(width.saturating_sub(x)),
                    bbox.height().min(height.saturating_sub(y)),
                )
            })
            .collect())
    }
}

/// Adapts a [`FaceLocator`] to the detector interface, discarding faces smaller
/// than `min_size` on either side.
pub struct FaceDetector<L> {
    locator: L,
    min_size: u32,
}

impl<L: FaceLocator> FaceDetector<L> {
    pub fn new(locator: L, min_size: u32) -> Self {
        Self { locator, min_size }
    }
}

impl<L: FaceLocator> Detector for FaceDetector<L> {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Face
    }

    fn needs_color(&self) -> bool {
        false
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionEvent>, DetectError> {
        let gray = luma_plane(frame)?;
        let faces = self.locator.locate(&gray, frame.width(), frame.height())?;

        Ok(faces
            .into_iter()
            .filter(|r| r.width >= self.min_size && r.height >= self.min_size)
            .map(|bbox| DetectionEvent {
                bbox,
                payload: Payload::Face,
            })
            .collect())
    }
}
