//! Turning a persisted detection into files.
//!
//! Each detector has its own naming scheme and artifact set: barcodes save the
//! raw frame under a timestamp, color regions save an annotated frame plus a
//! contour map keyed by iteration, faces save the raw frame under a running
//! counter.
//!
//! The contour map outlines every red region in the source frame, including
//! those too small to count as a detection.

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect as DrawRect;
use tracing::warn;

use super::persist::PersistenceTask;
use crate::capture::Frame;
use crate::detect::{color, DetectionSet, DetectorKind, Rect};
use crate::error::PipelineError;
use crate::preprocess::Scale;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;
const CONTOUR_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const CONTOUR_THICKNESS: u32 = 2;

pub struct Exporter {
    kind: DetectorKind,
    output_dir: PathBuf,
    saved: u64,
}

impl Exporter {
    /// Creates `output_dir` if it does not exist yet.
    pub fn new(kind: DetectorKind, output_dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).map_err(|source| PipelineError::OutputDir {
            path: output_dir.clone(),
            source,
        })?;
        Ok(Self {
            kind,
            output_dir,
            saved: 0,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Build the write tasks for one persisted frame.
    ///
    /// `scale` maps detection boxes from the prepared frame onto `source`.
    pub fn tasks(
        &mut self,
        source: &Frame,
        detections: &DetectionSet,
        scale: Scale,
        iteration: u64,
    ) -> Vec<PersistenceTask> {
        self.saved += 1;
        match self.kind {
            DetectorKind::Barcode => {
                let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
                let name = format!("qr_detected_{stamp}_{iteration:06}.png");
                vec![PersistenceTask::new(source.clone(), self.output_dir.join(name))]
            }
            DetectorKind::Face => {
                let name = format!("face_detected_{}.jpg", self.saved);
                vec![PersistenceTask::new(source.clone(), self.output_dir.join(name))]
            }
            DetectorKind::ColorRegion => {
                let Some(mut annotated) = source.to_rgb_image() else {
                    warn!("Source frame buffer is malformed, skipping export");
                    return Vec::new();
                };
                for event in detections.iter() {
                    draw_box(&mut annotated, event.bbox.scaled(scale));
                }

                let mut contours = RgbImage::new(source.width(), source.height());
                match color::regions(source) {
                    Ok(regions) => {
                        for region in &regions {
                            draw_outline(&mut contours, &region.outline);
                        }
                    }
                    Err(e) => warn!("Could not trace regions for contour map: {}", e),
                }

                let sequence = source.meta.sequence;
                vec![
                    PersistenceTask::new(
                        Frame::from_rgb(annotated, sequence),
                        self.output_dir.join(format!("red_detected_{iteration}.jpg")),
                    ),
                    PersistenceTask::new(
                        Frame::from_rgb(contours, sequence),
                        self.output_dir.join(format!("contours_{iteration}.jpg")),
                    ),
                ]
            }
        }
    }
}

fn draw_box(image: &mut RgbImage, rect: Rect) {
    for inset in 0..BOX_THICKNESS {
        let width = rect.width.saturating_sub(2 * inset);
        let height = rect.height.saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let r = DrawRect::at((rect.x + inset) as i32, (rect.y + inset) as i32).of_size(width, height);
        draw_hollow_rect_mut(image, r, BOX_COLOR);
    }
}

fn draw_outline(image: &mut RgbImage, outline: &[(u32, u32)]) {
    for &(x, y) in outline {
        let cell = DrawRect::at(x as i32, y as i32).of_size(CONTOUR_THICKNESS, CONTOUR_THICKNESS);
        draw_filled_rect_mut(image, cell, CONTOUR_COLOR);
    }
}
