//! Image analysis capability consumed by the validation actor

use thiserror::Error;

use crate::capture::{Capture, ValidationState};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalyzerError {
    #[error("capture has no pixels")]
    MissingPixels,

    #[error("analysis failed: {0}")]
    Failed(String),

    #[error("analyzer took the capture's pixel buffer")]
    PixelsTaken,

    #[error("analyzer panicked: {0}")]
    Panicked(String),

    #[error("analysis took {elapsed_ms}ms, limit is {limit_ms}ms")]
    TimedOut { elapsed_ms: u64, limit_ms: u64 },
}

/// Decides whether a read-back capture is a keeper.
///
/// Implementations are synchronous and may be backed by foreign code. They
/// may set fields on the capture but must not take its pixel buffer; doing
/// so fails the validation. Panics are caught by the caller.
pub trait Analyzer: Send {
    /// Returns `Succeeded` or `Failed`
    fn analyze(&mut self, capture: &mut Capture) -> Result<ValidationState, AnalyzerError>;
}

impl<F> Analyzer for F
where
    F: FnMut(&mut Capture) -> Result<ValidationState, AnalyzerError> + Send,
{
    fn analyze(&mut self, capture: &mut Capture) -> Result<ValidationState, AnalyzerError> {
        self(capture)
    }
}

/// Accepts every capture that carries pixels
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Analyzer for AcceptAll {
    fn analyze(&mut self, capture: &mut Capture) -> Result<ValidationState, AnalyzerError> {
        match capture.pixels {
            Some(ref pixels) if !pixels.is_empty() => Ok(ValidationState::Succeeded),
            _ => Err(AnalyzerError::MissingPixels),
        }
    }
}
