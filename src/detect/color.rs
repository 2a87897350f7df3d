//! Red blob detection.
//!
//! Pixels are thresholded in HSV (hue on the 0-180 scale, so red wraps around
//! both ends) into a binary mask. The mask is labelled into 8-connected
//! regions and their outer borders traced with `imageproc`; only regions
//! strictly larger than the minimum area become events.
//!
//! Areas are counted on the frame the detector is given, and this detector
//! asks the pipeline for full-resolution frames, so the threshold is in
//! source pixels.

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::region_labelling::{connected_components, Connectivity};

use super::{DetectionEvent, Detector, DetectorKind, Payload, Rect};
use crate::capture::{Frame, PixelFormat};
use crate::error::DetectError;

/// Regions at or below this many pixels are treated as sensor speckle.
pub const DEFAULT_MIN_AREA: u32 = 1500;

const HUE_LOW_MAX: u8 = 10;
const HUE_HIGH_MIN: u8 = 170;
const SATURATION_MIN: u8 = 120;
const VALUE_MIN: u8 = 70;

const MASK_ON: Luma<u8> = Luma([255]);
const MASK_OFF: Luma<u8> = Luma([0]);

/// A connected thresholded region, before area filtering
#[derive(Debug, Clone, PartialEq)]
pub struct ColorRegion {
    pub area: u32,
    pub bbox: Rect,
    /// Traced outer border, deduplicated
    pub outline: Vec<(u32, u32)>,
}

#[derive(Debug, Clone)]
pub struct ColorRegionDetector {
    min_area: u32,
}

impl Default for ColorRegionDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_AREA)
    }
}

impl ColorRegionDetector {
    pub fn new(min_area: u32) -> Self {
        Self { min_area }
    }

    pub fn min_area(&self) -> u32 {
        self.min_area
    }
}

impl Detector for ColorRegionDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::ColorRegion
    }

    fn needs_color(&self) -> bool {
        true
    }

    fn full_resolution(&self) -> bool {
        true
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionEvent>, DetectError> {
        Ok(regions(frame)?
            .into_iter()
            .filter(|region| region.area > self.min_area)
            .map(|region| DetectionEvent {
                bbox: region.bbox,
                payload: Payload::ColorRegion { area: region.area },
            })
            .collect())
    }
}

/// Every connected red region in the frame, unfiltered, in raster order of
/// their first pixel.
pub fn regions(frame: &Frame) -> Result<Vec<ColorRegion>, DetectError> {
    let mask = red_mask(frame)?;
    let labels = connected_components(&mask, Connectivity::Eight, MASK_OFF);

    // Labels are dense and start at 1 in raster order
    let mut regions: Vec<ColorRegion> = Vec::new();
    let mut extents: Vec<(u32, u32, u32, u32)> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let Some(idx) = (label[0] as usize).checked_sub(1) else {
            continue;
        };
        if idx >= regions.len() {
            regions.resize_with(idx + 1, || ColorRegion {
                area: 0,
                bbox: Rect::new(0, 0, 0, 0),
                outline: Vec::new(),
            });
            extents.resize(idx + 1, (u32::MAX, u32::MAX, 0, 0));
        }
        regions[idx].area += 1;
        let e = &mut extents[idx];
        *e = (e.0.min(x), e.1.min(y), e.2.max(x), e.3.max(y));
    }

    for (region, (min_x, min_y, max_x, max_y)) in regions.iter_mut().zip(&extents) {
        region.bbox = Rect::new(*min_x, *min_y, max_x - min_x + 1, max_y - min_y + 1);
    }

    for contour in find_contours::<u32>(&mask) {
        if contour.border_type != BorderType::Outer {
            continue;
        }
        let Some(first) = contour.points.first() else {
            continue;
        };
        let label = labels.get_pixel(first.x, first.y)[0] as usize;
        if let Some(region) = label.checked_sub(1).and_then(|idx| regions.get_mut(idx)) {
            region.outline.extend(contour.points.iter().map(|p| (p.x, p.y)));
        }
    }
    for region in &mut regions {
        region.outline.sort_unstable();
        region.outline.dedup();
    }

    Ok(regions)
}

/// 255 where the pixel passes the red threshold, 0 elsewhere.
fn red_mask(frame: &Frame) -> Result<GrayImage, DetectError> {
    if frame.format() != PixelFormat::Rgb24 {
        return Err(DetectError::UnsupportedFormat {
            expected: PixelFormat::Rgb24.name(),
            actual: frame.format().name(),
        });
    }
    let expected = frame.expected_len();
    if frame.data.len() != expected {
        return Err(DetectError::MalformedFrame {
            expected,
            actual: frame.data.len(),
        });
    }

    let width = frame.width() as usize;
    Ok(GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        let i = (y as usize * width + x as usize) * 3;
        let px = &frame.data[i..i + 3];
        if is_red(px[0], px[1], px[2]) {
            MASK_ON
        } else {
            MASK_OFF
        }
    }))
}

/// 8-bit HSV with hue in [0, 180)
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (f32::from(r), f32::from(g), f32::from(b));
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    ((h / 2.0).round() as u8, s.round() as u8, max as u8)
}

fn is_red(r: u8, g: u8, b: u8) -> bool {
    let (h, s, v) = rgb_to_hsv(r, g, b);
    (h <= HUE_LOW_MAX || h >= HUE_HIGH_MIN) && s >= SATURATION_MIN && v >= VALUE_MIN
}
