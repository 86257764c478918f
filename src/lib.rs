pub mod analysis;
pub mod capture;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod render;
pub mod sensor;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

pub use error::{DeviceError, PipelineError, Result};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub motion: MotionConfig,
    pub render: RenderConfig,
    pub device: DeviceConfig,
    pub validation: ValidationConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Metadata callbacks between two capture decisions
    pub throttle_frames: u32,
    /// Capture zone height/width in portrait
    pub capture_ratio: f32,
    /// Spare capture records kept by the builder
    pub record_pool_size: usize,
    /// Spare pixel buffers kept per size class
    pub buffer_pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Above this smoothed movement the device counts as moving
    pub movement_threshold: f32,
    /// Above this smoothed movement orientation is re-evaluated
    pub orientation_change_threshold: f32,
    /// |z| gravity above which the device is lying flat
    pub flat_enter: f32,
    /// |z| gravity below which a flat device is upright again
    pub flat_exit: f32,
    /// Exponential decay of the movement filter
    pub smoothing: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub surface_width: u32,
    pub surface_height: u32,
    /// Compositor tick period
    pub frame_interval_ms: u64,
    pub zoom_max: f32,
    /// Zoom step is `factor / zoom_velocity` per frame
    pub zoom_velocity: f32,
    pub camera_plugins: Vec<String>,
    pub preview_plugins: Vec<String>,
    pub ui_plugins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub lock_timeout_ms: u64,
    pub max_preview_width: u32,
    pub max_preview_height: u32,
    /// Pick the preview size from the surface aspect ratio
    pub auto_quality: bool,
    /// Manual quality, 0 is the lowest
    pub quality_level: usize,
    pub quality_levels: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Analyses slower than this count as failed
    pub analysis_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub save_captures: bool,
    pub directory: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            throttle_frames: 10,
            capture_ratio: 0.75, // 4:3
            record_pool_size: 4,
            buffer_pool_size: 2,
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            movement_threshold: 1.0,
            orientation_change_threshold: 2.0,
            flat_enter: 9.0,
            flat_exit: 6.0,
            smoothing: 0.9,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            surface_width: 1080,
            surface_height: 1920,
            frame_interval_ms: 33, // 30fps
            zoom_max: 10.0,
            zoom_velocity: 50.0,
            camera_plugins: vec!["camera_default".into()],
            preview_plugins: vec!["preview_default".into(), "preview_toon".into()],
            ui_plugins: vec!["ui_default".into()],
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2500,
            max_preview_width: 1920,
            max_preview_height: 1080,
            auto_quality: true,
            quality_level: 1,
            quality_levels: 3,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            analysis_timeout_ms: 2000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save_captures: true,
            directory: PathBuf::from("captures"),
        }
    }
}

impl RenderConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

impl DeviceConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl ValidationConfig {
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }
}

impl Config {
    /// Defaults, overlaid by an optional TOML file, overlaid by
    /// `AUTOCAPTURE__<SECTION>__<KEY>` environment variables
    #[instrument]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("AUTOCAPTURE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(PipelineError::Config(msg.to_string()));

        if self.capture.throttle_frames == 0 {
            return fail("capture.throttle_frames must be at least 1");
        }
        if !(self.capture.capture_ratio > 0.0 && self.capture.capture_ratio <= 1.0) {
            return fail("capture.capture_ratio must be in (0, 1]");
        }
        if self.motion.flat_exit >= self.motion.flat_enter {
            return fail("motion.flat_exit must be below motion.flat_enter");
        }
        if !(0.0..1.0).contains(&self.motion.smoothing) {
            return fail("motion.smoothing must be in [0, 1)");
        }
        if self.render.surface_width == 0 || self.render.surface_height == 0 {
            return fail("render surface must not be empty");
        }
        if self.render.zoom_max < 1.0 {
            return fail("render.zoom_max must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.throttle_frames, 10);
        assert_eq!(config.device.lock_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_load_overlays_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[capture]\nthrottle_frames = 5\n\n[motion]\nmovement_threshold = 0.5"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.capture.throttle_frames, 5);
        assert_eq!(config.motion.movement_threshold, 0.5);
        // Untouched keys keep their defaults
        assert_eq!(config.capture.capture_ratio, 0.75);
        assert_eq!(config.render.camera_plugins, vec!["camera_default"]);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::default();
        config.capture.throttle_frames = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.motion.flat_exit = 10.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.capture.capture_ratio = 1.5;
        assert!(config.validate().is_err());
    }
}
