//! Capture record passed between the producer, renderer and validator

use std::fmt;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

/// Three-valued readiness of one camera subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Readiness {
    /// Metadata for this dimension was not reported
    #[default]
    NotAvailable,
    NotReady,
    Ready,
}

/// Validation progress of a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValidationState {
    #[default]
    Wait,
    InProgress,
    Succeeded,
    Failed,
}

impl ValidationState {
    /// Analysis has produced a final verdict
    pub fn is_resolved(self) -> bool {
        matches!(self, ValidationState::Succeeded | ValidationState::Failed)
    }
}

/// One candidate frame.
///
/// Records are pooled by [`CaptureSnapshotBuilder`](super::CaptureSnapshotBuilder)
/// and mutated in place. A record is owned by exactly one actor at a time:
/// sending it in a message moves it, pixels included.
#[derive(Default)]
pub struct Capture {
    pub camera: Readiness,
    pub light: Readiness,
    pub faces: Readiness,

    /// Accelerometer snapshot at build time
    pub gravity: [f32; 3],
    /// Smoothed motion magnitude at build time
    pub movement: f32,

    /// Preview plugin that rendered the frame
    pub plugin_id: String,
    /// Capture zone dimensions in pixels
    pub width: u32,
    pub height: u32,
    /// RGBA pixels of the capture zone, present only after readback
    pub pixels: Option<BytesMut>,

    pub validation: ValidationState,
}

impl Capture {
    /// Copies everything except the pixel buffer, which is never shared
    pub fn copy_metadata_from(&mut self, other: &Capture) {
        self.camera = other.camera;
        self.light = other.light;
        self.faces = other.faces;
        self.gravity = other.gravity;
        self.movement = other.movement;
        self.plugin_id.clear();
        self.plugin_id.push_str(&other.plugin_id);
        self.width = other.width;
        self.height = other.height;
        self.validation = other.validation;
    }

    /// No readiness dimension reports NOT_READY
    pub fn is_ready(&self) -> bool {
        self.camera != Readiness::NotReady
            && self.light != Readiness::NotReady
            && self.faces != Readiness::NotReady
    }

    /// Clears the record for reuse, handing back its pixel buffer if any
    pub(crate) fn reset(&mut self) -> Option<BytesMut> {
        self.camera = Readiness::NotAvailable;
        self.light = Readiness::NotAvailable;
        self.faces = Readiness::NotAvailable;
        self.gravity = [0.0; 3];
        self.movement = 0.0;
        self.plugin_id.clear();
        self.width = 0;
        self.height = 0;
        self.validation = ValidationState::Wait;
        self.pixels.take()
    }
}

impl fmt::Debug for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capture")
            .field("validation", &self.validation)
            .field("camera", &self.camera)
            .field("light", &self.light)
            .field("faces", &self.faces)
            .field("gravity", &self.gravity)
            .field("movement", &self.movement)
            .field("plugin_id", &self.plugin_id)
            .field("size", &format_args!("{}x{}", self.width, self.height))
            .field("pixels", &self.pixels.as_ref().map(|p| p.len()))
            .finish()
    }
}
