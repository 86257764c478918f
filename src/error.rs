//! Error types for the capture pipeline

use std::time::Duration;

use thiserror::Error;

use crate::analysis::AnalyzerError;

/// Result type alias used across the library
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Camera device and session failures.
///
/// These are reported to the host as `SYSTEM_ERROR` and leave the frame
/// producer in its degraded state until the host retries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("timed out after {0:?} waiting for the camera device lock")]
    LockTimeout(Duration),

    #[error("no camera device found")]
    NotFound,

    #[error("camera session configuration failed: {0}")]
    Session(String),

    #[error("camera device disconnected")]
    Disconnected,
}

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),

    /// Compositor could not present a rendered frame. Fatal for the render cycle.
    #[error("compositor failed to present frame")]
    Presentation,

    #[error("readback of {width}x{height} zone failed: {reason}")]
    Readback {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("actor {0} is no longer running")]
    Disconnected(&'static str),

    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether the error ends the pipeline rather than degrading one actor
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Presentation)
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(e: config::ConfigError) -> Self {
        PipelineError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_presentation_is_fatal() {
        assert!(PipelineError::Presentation.is_fatal());
        assert!(!PipelineError::Device(DeviceError::NotFound).is_fatal());
        assert!(!PipelineError::Disconnected("validator").is_fatal());
    }

    #[test]
    fn test_device_error_converts() {
        let err: PipelineError = DeviceError::LockTimeout(Duration::from_millis(2500)).into();
        assert!(err.to_string().contains("device lock"));
    }
}
