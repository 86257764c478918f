//! Message catalog.
//!
//! Each actor owns one FIFO mailbox typed by its own message enum. Payloads
//! holding a [`Capture`] move it, pixel buffer included: the sender cannot
//! touch it afterwards.

use std::fmt;

use flume::Sender;

use crate::capture::Capture;
use crate::error::PipelineError;
use crate::render::{Size, ZoomState};
use crate::sensor::Orientation;

/// Render orchestrator mailbox
pub enum RenderMessage {
    /// Validator mailbox to send VALIDATION_REQUEST to
    ConnectValidator(Sender<ValidatorMessage>),
    OrientationChange(Orientation),
    Shutdown,
    ChangeCameraPlugin(String),
    ChangePreviewSize(Size),
    ChangePreviewPlugin(String),
    /// Preview-only snapshot, never analyzed
    ChangeCapture(Capture),
    ChangeZoom(ZoomState),
    /// Gated snapshot to read back and validate
    CaptureNextFrame(Capture),
    ValidationResult(Capture),
}

/// Validation actor mailbox
pub enum ValidatorMessage {
    ValidationRequest(Capture),
    Shutdown,
}

/// Actor kinds, for connection and error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    Producer,
    Renderer,
    Validator,
}

/// Events surfaced to whoever hosts the pipeline
pub enum HostEvent {
    SystemError {
        source: ActorKind,
        error: PipelineError,
    },
    ConnectRenderer(Sender<RenderMessage>),
    ConnectValidator(Sender<ValidatorMessage>),
    /// Validated capture handed downstream. Return it with
    /// [`Pipeline::recycle`](super::Pipeline::recycle) once consumed.
    CaptureValidated(Capture),
    /// An actor left its message loop
    Stopped(ActorKind),
}

impl RenderMessage {
    pub fn name(&self) -> &'static str {
        match self {
            RenderMessage::ConnectValidator(_) => "SYSTEM_CONNECT_VALIDATOR",
            RenderMessage::OrientationChange(_) => "SYSTEM_ORIENTATION_CHANGE",
            RenderMessage::Shutdown => "SYSTEM_SHUTDOWN",
            RenderMessage::ChangeCameraPlugin(_) => "CHANGE_CAMERA_PLUGIN",
            RenderMessage::ChangePreviewSize(_) => "CHANGE_PREVIEW_SIZE",
            RenderMessage::ChangePreviewPlugin(_) => "CHANGE_PREVIEW_PLUGIN",
            RenderMessage::ChangeCapture(_) => "CHANGE_CAPTURE",
            RenderMessage::ChangeZoom(_) => "CHANGE_ZOOM",
            RenderMessage::CaptureNextFrame(_) => "CAPTURE_NEXT_FRAME",
            RenderMessage::ValidationResult(_) => "VALIDATION_RESULT",
        }
    }
}

impl fmt::Debug for RenderMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for ValidatorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidatorMessage::ValidationRequest(c) => write!(f, "VALIDATION_REQUEST({:?})", c),
            ValidatorMessage::Shutdown => f.write_str("SYSTEM_SHUTDOWN"),
        }
    }
}

impl fmt::Debug for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostEvent::SystemError { source, error } => {
                write!(f, "SYSTEM_ERROR({:?}: {})", source, error)
            }
            HostEvent::ConnectRenderer(_) => f.write_str("SYSTEM_CONNECT_RENDERER"),
            HostEvent::ConnectValidator(_) => f.write_str("SYSTEM_CONNECT_VALIDATOR"),
            HostEvent::CaptureValidated(c) => write!(f, "CAPTURE_VALIDATED({:?})", c),
            HostEvent::Stopped(kind) => write!(f, "STOPPED({:?})", kind),
        }
    }
}
