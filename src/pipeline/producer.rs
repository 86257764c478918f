//! Frame producer: turns per-frame camera metadata into capture snapshots
//! and decides which of them are worth validating.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flume::{Receiver, Sender};
use tracing::{debug, info, warn};

use super::message::{ActorKind, HostEvent, RenderMessage};
use crate::capture::{Capture, CaptureSnapshotBuilder, FrameMetadata, ValidationState};
use crate::error::{DeviceError, PipelineError};
use crate::render::ZoomState;
use crate::sensor::{MotionSlot, Orientation};
use crate::CaptureConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Preview,
    /// Device failure reported, waiting for the host to retry
    Error,
    /// Renderer is gone
    Stopped,
}

/// What a throttled tick sent to the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emitted {
    CaptureNextFrame,
    PreviewUpdate,
}

/// The capture gate: a snapshot may be validated only when the user is not
/// touching the screen, the device is still, the validation slot is free and
/// no readiness dimension is NOT_READY.
pub fn capture_gate(
    capture: &Capture,
    slot: ValidationState,
    touched: bool,
    moving: bool,
) -> bool {
    !touched && !moving && slot == ValidationState::Wait && capture.is_ready()
}

/// User input that closes the gate or drives the zoom
#[derive(Clone)]
pub struct InputHandle {
    touched: Arc<AtomicBool>,
    render: Sender<RenderMessage>,
}

impl InputHandle {
    pub fn set_touched(&self, touched: bool) {
        self.touched.store(touched, Ordering::Relaxed);
    }

    pub fn is_touched(&self) -> bool {
        self.touched.load(Ordering::Relaxed)
    }

    /// Zoom key held down. No capture is taken while zooming.
    pub fn zoom_pressed(&self, state: ZoomState) {
        self.set_touched(true);
        let _ = self.render.send(RenderMessage::ChangeZoom(state));
    }

    pub fn zoom_released(&self) {
        self.set_touched(false);
        let _ = self.render.send(RenderMessage::ChangeZoom(ZoomState::None));
    }

    pub fn reset_zoom(&self) {
        let _ = self.render.send(RenderMessage::ChangeZoom(ZoomState::Reset));
    }
}

pub struct FrameProducer {
    builder: Arc<CaptureSnapshotBuilder>,
    motion: MotionSlot,
    orientations: Receiver<Orientation>,
    touched: Arc<AtomicBool>,
    render: Sender<RenderMessage>,
    host: Sender<HostEvent>,
    throttle: u32,
    frame_count: u32,
    /// Orientation not yet forwarded because a capture was in flight
    pending_orientation: Option<Orientation>,
    state: ProducerState,
}

impl FrameProducer {
    pub fn new(
        config: &CaptureConfig,
        builder: Arc<CaptureSnapshotBuilder>,
        motion: MotionSlot,
        orientations: Receiver<Orientation>,
        render: Sender<RenderMessage>,
        host: Sender<HostEvent>,
    ) -> Self {
        Self {
            builder,
            motion,
            orientations,
            touched: Arc::new(AtomicBool::new(false)),
            render,
            host,
            throttle: config.throttle_frames.max(1),
            frame_count: 0,
            pending_orientation: None,
            state: ProducerState::Preview,
        }
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    pub fn input_handle(&self) -> InputHandle {
        InputHandle {
            touched: self.touched.clone(),
            render: self.render.clone(),
        }
    }

    /// Per-frame metadata callback. Acts on one frame out of `throttle`.
    pub fn on_capture_completed(&mut self, metadata: &FrameMetadata) -> Option<Emitted> {
        if self.state != ProducerState::Preview {
            return None;
        }
        metrics::counter!("frames_seen").increment(1);
        self.drain_orientations();

        self.frame_count += 1;
        if self.frame_count < self.throttle {
            return None;
        }
        self.frame_count = 0;

        self.builder.build(metadata);
        let mut capture = self.builder.publish();
        let motion = self.motion.load();
        capture.gravity = motion.gravity;
        capture.movement = motion.movement;

        let touched = self.touched.load(Ordering::Relaxed);
        let slot = self.builder.validation_slot();
        let (message, emitted) = if capture_gate(&capture, slot, touched, motion.moving) {
            debug!("Gate open for frame {}: {:?}", metadata.sequence, capture);
            metrics::counter!("captures_requested").increment(1);
            (
                RenderMessage::CaptureNextFrame(capture),
                Emitted::CaptureNextFrame,
            )
        } else {
            (RenderMessage::ChangeCapture(capture), Emitted::PreviewUpdate)
        };

        self.send(message).then_some(emitted)
    }

    /// Orientation changes reach the renderer only while no capture is in
    /// flight; the latest one is held back until then.
    pub fn on_orientation_change(&mut self, orientation: Orientation) {
        self.pending_orientation = Some(orientation);
        self.flush_orientation();
    }

    fn drain_orientations(&mut self) {
        if let Some(orientation) = self.orientations.try_iter().last() {
            self.pending_orientation = Some(orientation);
        }
        self.flush_orientation();
    }

    fn flush_orientation(&mut self) {
        if self.state != ProducerState::Preview || self.builder.is_validating() {
            return;
        }
        if let Some(orientation) = self.pending_orientation.take() {
            debug!("Forwarding orientation {}°", orientation.degrees());
            self.send(RenderMessage::OrientationChange(orientation));
        }
    }

    /// Device failure: reported once, producer idles until [`resume`](Self::resume)
    pub fn on_device_error(&mut self, error: DeviceError) {
        warn!("Camera device error: {}", error);
        if self.state == ProducerState::Error {
            return;
        }
        self.state = ProducerState::Error;
        let _ = self.host.send(HostEvent::SystemError {
            source: ActorKind::Producer,
            error: PipelineError::Device(error),
        });
    }

    pub fn resume(&mut self) {
        if self.state == ProducerState::Error {
            info!("Frame producer resumed");
            self.state = ProducerState::Preview;
            self.frame_count = 0;
        }
    }

    fn send(&mut self, message: RenderMessage) -> bool {
        match self.render.send(message) {
            Ok(()) => true,
            Err(flume::SendError(message)) => {
                warn!("Renderer gone, producer stopping");
                self.state = ProducerState::Stopped;
                if let RenderMessage::CaptureNextFrame(capture)
                | RenderMessage::ChangeCapture(capture) = message
                {
                    self.builder.recycle(capture);
                }
                false
            }
        }
    }
}
