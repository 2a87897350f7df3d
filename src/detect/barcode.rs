//! QR code detection
//!
//! Runs grid detection over the luma plane and keeps only grids that decode.
//! Bounding boxes stay in the coordinates of the frame passed in.

use tracing::debug;

use super::{luma_plane, DetectionEvent, Detector, DetectorKind, Payload, Rect};
use crate::capture::Frame;
use crate::error::DetectError;

#[derive(Debug, Default)]
pub struct BarcodeDetector;

impl BarcodeDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Detector for BarcodeDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Barcode
    }

    fn needs_color(&self) -> bool {
        false
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionEvent>, DetectError> {
        let luma = luma_plane(frame)?;
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width, height, |x, y| luma[y * width + x]);
        let grids = prepared.detect_grids();

        let mut events = Vec::with_capacity(grids.len());
        for grid in grids {
            let bbox = bounding_rect(&grid.bounds, frame.width(), frame.height());
            match grid.decode() {
                Ok((_meta, text)) => events.push(DetectionEvent {
                    bbox,
                    payload: Payload::Barcode { text },
                }),
                Err(e) => debug!(error = %e, region = %bbox, "Failed to decode QR grid"),
            }
        }

        Ok(events)
    }
}

/// Axis-aligned box around the four grid corners, clipped to the frame.
fn bounding_rect(corners: &[rqrr::Point; 4], width: u32, height: u32) -> Rect {
    let clamp_x = |v: i32| v.clamp(0, width as i32) as u32;
    let clamp_y = |v: i32| v.clamp(0, height as i32) as u32;

    let min_x = corners.iter().map(|p| p.x).min().map_or(0, clamp_x);
    let max_x = corners.iter().map(|p| p.x).max().map_or(0, clamp_x);
    let min_y = corners.iter().map(|p| p.y).min().map_or(0, clamp_y);
    let max_y = corners.iter().map(|p| p.y).max().map_or(0, clamp_y);

    Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;

    #[test]
    fn blank_frame_has_no_codes() {
        let frame = Frame::new(vec![255u8; 64 * 48], 64, 48, PixelFormat::Gray8);
        let events = BarcodeDetector::new().detect(&frame).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn bounds_are_clipped_to_frame() {
        let corners = [
            rqrr::Point { x: -5, y: 2 },
            rqrr::Point { x: 40, y: 3 },
            rqrr::Point { x: 41, y: 60 },
            rqrr::Point { x: -4, y: 59 },
        ];
        assert_eq!(bounding_rect(&corners, 32, 50), Rect::new(0, 2, 32, 48));
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let frame = Frame::new(vec![0u8; 10], 64, 48, PixelFormat::Gray8);
        assert!(BarcodeDetector::new().detect(&frame).is_err());
    }
}
