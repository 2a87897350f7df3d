//! Downscaling and color reduction ahead of detection.
//!
//! Detector cost scales with pixel count, so frames are shrunk to a fixed target
//! size regardless of what the camera delivers. The returned [`Scale`] is the
//! factor a consumer multiplies detector coordinates by to get back to the
//! source frame.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

use crate::capture::{Frame, PixelFormat};
use crate::error::DetectError;
use crate::PreprocessConfig;

/// Source-to-prepared size ratio per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub x: f32,
    pub y: f32,
}

impl Scale {
    pub const IDENTITY: Scale = Scale { x: 1.0, y: 1.0 };

    pub fn between(source: (u32, u32), prepared: (u32, u32)) -> Self {
        Self {
            x: source.0 as f32 / prepared.0.max(1) as f32,
            y: source.1 as f32 / prepared.1.max(1) as f32,
        }
    }
}

/// A frame ready for detection plus the mapping back to its source.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub frame: Frame,
    pub scale: Scale,
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
    target: Option<(u32, u32)>,
    grayscale: bool,
}

impl Preprocessor {
    /// `grayscale` is set when the active detector has no use for color.
    pub fn new(config: &PreprocessConfig, grayscale: bool) -> Self {
        let target = (config.width > 0 && config.height > 0).then_some((config.width, config.height));
        Self { target, grayscale }
    }

    /// Keep frames at capture resolution, only reducing color if asked to.
    pub fn without_resize(self) -> Self {
        Self { target: None, ..self }
    }

    pub fn prepare(&self, frame: &Frame) -> Result<Prepared, DetectError> {
        let expected = frame.expected_len();
        if frame.data.len() != expected {
            return Err(DetectError::MalformedFrame {
                expected,
                actual: frame.data.len(),
            });
        }

        let source = (frame.width(), frame.height());
        let size = match self.target {
            Some((w, h)) if w < source.0 || h < source.1 => (w.min(source.0), h.min(source.1)),
            _ => source,
        };
        let to_gray = self.grayscale && frame.format() == PixelFormat::Rgb24;

        if size == source && !to_gray {
            return Ok(Prepared {
                frame: frame.clone(),
                scale: Scale::IDENTITY,
            });
        }

        let sequence = frame.meta.sequence;
        let prepared = match frame.format() {
            PixelFormat::Gray8 => {
                let img = gray_image(frame)?;
                Frame::from_gray(resize_gray(img, size), sequence)
            }
            PixelFormat::Rgb24 => {
                let img = resize_rgb(rgb_image(frame)?, size);
                if to_gray {
                    Frame::from_gray(imageops::grayscale(&img), sequence)
                } else {
                    Frame::from_rgb(img, sequence)
                }
            }
        };

        Ok(Prepared {
            frame: Frame {
                timestamp: frame.timestamp,
                ..prepared
            },
            scale: Scale::between(source, size),
        })
    }
}

fn rgb_image(frame: &Frame) -> Result<RgbImage, DetectError> {
    RgbImage::from_raw(frame.width(), frame.height(), frame.data.to_vec()).ok_or(
        DetectError::MalformedFrame {
            expected: frame.expected_len(),
            actual: frame.data.len(),
        },
    )
}

fn gray_image(frame: &Frame) -> Result<GrayImage, DetectError> {
    GrayImage::from_raw(frame.width(), frame.height(), frame.data.to_vec()).ok_or(
        DetectError::MalformedFrame {
            expected: frame.expected_len(),
            actual: frame.data.len(),
        },
    )
}

fn resize_rgb(img: RgbImage, (w, h): (u32, u32)) -> RgbImage {
    if img.dimensions() == (w, h) {
        img
    } else {
        imageops::resize(&img, w, h, FilterType::Triangle)
    }
}

fn resize_gray(img: GrayImage, (w, h): (u32, u32)) -> GrayImage {
    if img.dimensions() == (w, h) {
        img
    } else {
        imageops::resize(&img, w, h, FilterType::Triangle)
    }
}
