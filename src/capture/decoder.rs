use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};
use serde::{Deserialize, Serialize};

use super::frame::PixelFormat;
use crate::error::CaptureError;

/// Formats a device may be asked to deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureFormat {
    Mjpeg,
    Yuyv,
}

impl CaptureFormat {
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            CaptureFormat::Mjpeg => *b"MJPG",
            CaptureFormat::Yuyv => *b"YUYV",
        }
    }

    pub fn from_fourcc(repr: [u8; 4]) -> Option<Self> {
        match &repr {
            b"MJPG" => Some(CaptureFormat::Mjpeg),
            b"YUYV" => Some(CaptureFormat::Yuyv),
            _ => None,
        }
    }
}

/// Decoded pixels plus the layout they ended up in.
#[derive(Debug)]
pub struct Decoded {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

pub fn decode_frame(
    data: &[u8],
    format: CaptureFormat,
    width: u32,
    height: u32,
) -> Result<Decoded, CaptureError> {
    if data.is_empty() {
        return Err(CaptureError::CaptureFailed("device returned an empty buffer".into()));
    }

    match format {
        CaptureFormat::Mjpeg => {
            let mut decoder = Decoder::new(data);
            let pixels = decoder
                .decode()
                .map_err(|e| CaptureError::CorruptFrame(format!("MJPEG decode: {e}")))?;
            let info = decoder
                .info()
                .ok_or_else(|| CaptureError::CorruptFrame("MJPEG frame has no header".into()))?;
            let format = match info.pixel_format {
                JpegPixelFormat::RGB24 => PixelFormat::Rgb24,
                JpegPixelFormat::L8 => PixelFormat::Gray8,
                other => {
                    return Err(CaptureError::CorruptFrame(format!(
                        "unsupported JPEG pixel format {other:?}"
                    )))
                }
            };
            Ok(Decoded {
                pixels,
                width: u32::from(info.width),
                height: u32::from(info.height),
                format,
            })
        }
        CaptureFormat::Yuyv => {
            let expected = width as usize * height as usize * 2;
            if data.len() < expected {
                return Err(CaptureError::CorruptFrame(format!(
                    "short YUYV frame: {} of {expected} bytes",
                    data.len()
                )));
            }
            Ok(Decoded {
                pixels: yuyv_to_rgb(&data[..expected]),
                width,
                height,
                format: PixelFormat::Rgb24,
            })
        }
    }
}

/// BT.601 limited-range YUYV 4:2:2 to packed RGB.
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    rgb
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_grey_maps_to_neutral_rgb() {
        // Y=126 with neutral chroma lands on mid grey
        let decoded = decode_frame(&[126, 128, 126, 128], CaptureFormat::Yuyv, 2, 1).unwrap();
        assert_eq!(decoded.format, PixelFormat::Rgb24);
        assert_eq!(decoded.pixels.len(), 6);
        assert!(decoded.pixels.iter().all(|&p| p == decoded.pixels[0]));
        assert!((120..=135).contains(&decoded.pixels[0]));
    }

    #[test]
    fn empty_buffer_is_a_capture_failure() {
        let err = decode_frame(&[], CaptureFormat::Mjpeg, 640, 480).unwrap_err();
        assert!(matches!(err, CaptureError::CaptureFailed(_)));
    }

    #[test]
    fn short_yuyv_buffer_is_corrupt() {
        let err = decode_frame(&[0; 6], CaptureFormat::Yuyv, 2, 2).unwrap_err();
        assert!(matches!(err, CaptureError::CorruptFrame(_)));
    }

    #[test]
    fn garbage_mjpeg_is_corrupt_not_fatal() {
        let err = decode_frame(&[0xFF, 0xD8, 0x00, 0x13, 0x37], CaptureFormat::Mjpeg, 640, 480).unwrap_err();
        assert!(matches!(err, CaptureError::CorruptFrame(_)));
    }

    #[test]
    fn fourcc_round_trips_known_formats() {
        assert_eq!(CaptureFormat::from_fourcc(*b"MJPG"), Some(CaptureFormat::Mjpeg));
        assert_eq!(CaptureFormat::from_fourcc(*b"NV12"), None);
    }
}
