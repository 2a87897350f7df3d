pub mod capture;
pub mod detect;
pub mod error;
pub mod pipeline;
pub mod preprocess;
pub mod utils;

use std::path::{Path, PathBuf};

use capture::CaptureFormat;
use detect::DetectorKind;
use serde::{Deserialize, Serialize};

pub use capture::{Frame, FrameSource};
pub use detect::Detector;
pub use error::{PipelineError, Result};
pub use pipeline::PipelineLoop;

/// Config file looked up when `LOOKOUT_CONFIG` is unset (extension optional)
pub const DEFAULT_CONFIG_FILE: &str = "lookout";

/// System configuration, fixed for the life of the process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub preprocess: PreprocessConfig,
    pub detector: DetectorConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device path, bare index (`4` → `/dev/video4`), or empty to auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32, // Hint only
    pub format: CaptureFormat,
    pub buffer_count: u32,
}

/// Detector input size; zero on either axis disables downscaling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub kind: DetectorKind,
    /// Color regions must be strictly larger than this (source px²)
    pub min_region_area: u32,
    /// Smallest face side, in detector-input pixels
    pub min_face_size: u32,
    /// SeetaFace model file, required for `kind = "face"`
    pub face_model: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Defaults to a per-detector directory
    pub output_dir: Option<PathBuf>,
    /// Persist only on iterations that are a multiple of this
    pub cadence: u64,
    pub workers: usize,
    /// Pending writes beyond this are dropped
    pub queue_depth: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            fps: 30,
            format: CaptureFormat::Mjpeg,
            buffer_count: 4,
        }
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: DetectorKind::Barcode,
            min_region_area: detect::DEFAULT_MIN_AREA,
            min_face_size: 30,
            face_model: None,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            cadence: pipeline::gate::DEFAULT_CADENCE,
            workers: 2,
            queue_depth: 8,
        }
    }
}

impl Config {
    /// Defaults, then `$LOOKOUT_CONFIG` (or `lookout.toml`), then `LOOKOUT__SECTION__KEY` env vars.
    pub fn load() -> Result<Self> {
        let path = std::env::var("LOOKOUT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        let explicit = std::env::var_os("LOOKOUT_CONFIG").is_some();
        Self::build(Some(Path::new(&path)), explicit, true)
    }

    /// Defaults overlaid with a single file, ignoring the environment.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::build(Some(path), true, false)
    }

    fn build(file: Option<&Path>, required: bool, with_env: bool) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(required));
        }
        if with_env {
            builder = builder.add_source(
                config::Environment::with_prefix("LOOKOUT")
                    .prefix_separator("__")
                    .separator("__"),
            );
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(PipelineError::Config(msg.into()));

        if self.capture.width == 0 || self.capture.height == 0 {
            return invalid("capture width and height must be non-zero");
        }
        if self.capture.buffer_count == 0 {
            return invalid("capture.buffer_count must be at least 1");
        }
        if self.persistence.cadence == 0 {
            return invalid("persistence.cadence must be at least 1");
        }
        if self.persistence.workers == 0 {
            return invalid("persistence.workers must be at least 1");
        }
        if self.persistence.queue_depth == 0 {
            return invalid("persistence.queue_depth must be at least 1");
        }
        Ok(())
    }

    /// Where artifacts are written for the selected detector.
    pub fn output_dir(&self) -> PathBuf {
        self.persistence
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.detector.kind.default_output_dir()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_reference_setup() {
        let config = Config::default();
        assert_eq!((config.capture.width, config.capture.height), (640, 480));
        assert_eq!(config.capture.format, CaptureFormat::Mjpeg);
        assert_eq!(config.persistence.cadence, 5);
        assert_eq!(config.detector.min_region_area, 1500);
        assert_eq!(config.output_dir(), PathBuf::from("qr-images"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lookout.toml");
        std::fs::write(
            &path,
            r#"
[capture]
device = "4"

[detector]
kind = "color_region"

[persistence]
cadence = 3
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.capture.device, "4");
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.detector.kind, DetectorKind::ColorRegion);
        assert_eq!(config.persistence.cadence, 3);
        assert_eq!(config.output_dir(), PathBuf::from("color-images"));
    }

    #[test]
    fn zero_cadence_fails_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[persistence]\ncadence = 0\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(PipelineError::Config(_))));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load_from(&dir.path().join("nope.toml")).is_err());
    }
}
