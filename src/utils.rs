use std::path::Path;

use tracing::info;
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::error::CaptureError;

/// Turn a configured device identifier into a device node path.
///
/// A bare index `N` maps to `/dev/videoN`; an empty identifier probes for the
/// first usable camera.
pub fn resolve_device(id: &str) -> Result<String, CaptureError> {
    let id = id.trim();
    if id.is_empty() {
        return auto_detect_device();
    }
    if let Ok(index) = id.parse::<u32>() {
        return Ok(format!("/dev/video{}", index));
    }
    Ok(id.to_string())
}

/// Auto-detect best capture device
pub fn auto_detect_device() -> Result<String, CaptureError> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        if let Ok(formats) = dev.enum_formats() {
            let usable = formats
                .iter()
                .any(|fmt| fmt.fourcc == FourCC::new(b"MJPG") || fmt.fourcc == FourCC::new(b"YUYV"));
            if usable {
                info!("Found capture device: {} - {}", path, caps.card);
                return Ok(path);
            }
        }
    }

    Err(CaptureError::DeviceUnavailable {
        device: "<auto>".into(),
        reason: "no suitable capture device found".into(),
    })
}
