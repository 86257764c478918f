//! Render orchestrator: the per-frame compositor loop and the capture
//! state machine driving readback and validation.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, instrument, warn};

use super::message::{ActorKind, HostEvent, RenderMessage, ValidatorMessage};
use super::CaptureSink;
use crate::capture::{Capture, CaptureSnapshotBuilder, ValidationState};
use crate::error::{PipelineError, Result};
use crate::render::geometry::{capture_zone, viewport};
use crate::render::{Compositor, PluginKind, PluginRegistry, Rect, Size, Zoom, ZoomState};
use crate::sensor::Orientation;
use crate::{CaptureConfig, RenderConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Preview,
    /// Gated capture accepted, readback on the next tick
    CaptureNextFrame,
    ValidationInProgress,
    /// Validated capture waiting for hand-off on the next tick
    ValidationDone,
    /// Presentation failed, the loop is ending
    Error,
}

impl RenderState {
    pub fn can_transition_to(self, next: RenderState) -> bool {
        use RenderState::*;
        matches!(
            (self, next),
            (Preview, CaptureNextFrame)
                | (CaptureNextFrame, ValidationInProgress)
                | (CaptureNextFrame, Preview)
                | (ValidationInProgress, ValidationDone)
                | (ValidationInProgress, Preview)
                | (ValidationDone, Preview)
                | (_, Error)
        )
    }
}

/// Changes latched until the next PREVIEW tick
#[derive(Debug, Default)]
struct Pending {
    preview_size: Option<Size>,
    orientation: Option<Orientation>,
    camera_plugin: Option<String>,
    preview_plugin: Option<String>,
    zoom: Option<ZoomState>,
}

pub struct RenderOrchestrator {
    state: RenderState,
    compositor: Box<dyn Compositor>,
    builder: Arc<CaptureSnapshotBuilder>,
    sink: Box<dyn CaptureSink>,
    host: Sender<HostEvent>,
    validator: Option<Sender<ValidatorMessage>>,
    plugins: PluginRegistry,
    zoom: Zoom,
    capture_ratio: f32,
    surface: Size,
    preview_size: Size,
    orientation: Orientation,
    viewport: Rect,
    zone: Rect,
    pending: Pending,
    /// Capture accepted on CAPTURE_NEXT_FRAME, read back on the next tick
    in_flight: Option<Capture>,
    /// Validated capture waiting for hand-off
    done: Option<Capture>,
    /// Latest preview-only snapshot
    preview: Option<Capture>,
    readbacks: u64,
}

impl RenderOrchestrator {
    pub fn new(
        render: &RenderConfig,
        capture: &CaptureConfig,
        mut compositor: Box<dyn Compositor>,
        builder: Arc<CaptureSnapshotBuilder>,
        sink: Box<dyn CaptureSink>,
        host: Sender<HostEvent>,
    ) -> Self {
        let surface = Size::new(render.surface_width, render.surface_height);
        let orientation = Orientation::default();
        // Until the camera reports a preview size, the preview covers the surface
        let preview_size = surface;
        let viewport = viewport(surface, preview_size);
        let zone = capture_zone(viewport, orientation, capture.capture_ratio);
        compositor.resize(surface, viewport);

        Self {
            state: RenderState::Preview,
            compositor,
            builder,
            sink,
            host,
            validator: None,
            plugins: PluginRegistry::new(
                render.camera_plugins.clone(),
                render.preview_plugins.clone(),
                render.ui_plugins.clone(),
            ),
            zoom: Zoom::new(render.zoom_max, render.zoom_velocity),
            capture_ratio: capture.capture_ratio,
            surface,
            preview_size,
            orientation,
            viewport,
            zone,
            pending: Pending::default(),
            in_flight: None,
            done: None,
            preview: None,
            readbacks: 0,
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    /// Capture zone, relative to the viewport
    pub fn zone(&self) -> Rect {
        self.zone
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn zoom_factor(&self) -> f32 {
        self.zoom.factor()
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Latest CHANGE_CAPTURE snapshot
    pub fn preview_capture(&self) -> Option<&Capture> {
        self.preview.as_ref()
    }

    /// The accepted capture waiting for readback, or the validated one
    /// waiting for hand-off
    pub fn held_capture(&self) -> Option<&Capture> {
        self.in_flight.as_ref().or(self.done.as_ref())
    }

    /// Number of zone readbacks performed so far
    pub fn readbacks(&self) -> u64 {
        self.readbacks
    }

    fn transition(&mut self, next: RenderState) {
        if !self.state.can_transition_to(next) {
            warn!("Unexpected render transition {:?} -> {:?}", self.state, next);
        }
        debug!("Render state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn stamp(&self, capture: &mut Capture) {
        capture.plugin_id.clear();
        capture
            .plugin_id
            .push_str(self.plugins.active(PluginKind::Preview));
        capture.width = self.zone.width;
        capture.height = self.zone.height;
    }

    pub fn handle(&mut self, message: RenderMessage) -> ControlFlow<()> {
        match message {
            RenderMessage::ConnectValidator(validator) => {
                info!("Validator connected");
                self.validator = Some(validator);
            }
            RenderMessage::OrientationChange(orientation) => {
                self.pending.orientation = Some(orientation);
            }
            RenderMessage::Shutdown => return ControlFlow::Break(()),
            RenderMessage::ChangeCameraPlugin(id) => self.pending.camera_plugin = Some(id),
            RenderMessage::ChangePreviewSize(size) => self.pending.preview_size = Some(size),
            RenderMessage::ChangePreviewPlugin(id) => self.pending.preview_plugin = Some(id),
            RenderMessage::ChangeZoom(state) => self.pending.zoom = Some(state),
            RenderMessage::ChangeCapture(mut capture) => {
                self.stamp(&mut capture);
                capture.validation = ValidationState::Wait;
                if let Some(previous) = self.preview.replace(capture) {
                    self.builder.recycle(previous);
                }
            }
            RenderMessage::CaptureNextFrame(capture) => self.on_capture_next_frame(capture),
            RenderMessage::ValidationResult(capture) => self.on_validation_result(capture),
        }
        ControlFlow::Continue(())
    }

    fn on_capture_next_frame(&mut self, mut capture: Capture) {
        if self.state != RenderState::Preview {
            debug!("Capture request while {:?}, dropping", self.state);
            self.builder.recycle(capture);
            return;
        }
        if !self.builder.begin_validation() {
            self.builder.recycle(capture);
            return;
        }

        self.stamp(&mut capture);
        capture.validation = ValidationState::InProgress;
        self.in_flight = Some(capture);
        self.transition(RenderState::CaptureNextFrame);
    }

    fn on_validation_result(&mut self, mut capture: Capture) {
        if self.state != RenderState::ValidationInProgress {
            warn!(
                "Validation result while {:?}, discarding {:?}",
                self.state, capture
            );
            self.builder.recycle(capture);
            return;
        }

        if capture.validation == ValidationState::Succeeded {
            info!("Capture validated: {:?}", capture);
            self.done = Some(capture);
            self.transition(RenderState::ValidationDone);
        } else {
            debug!("Capture rejected: {:?}", capture);
            capture.validation = ValidationState::Wait;
            self.builder.recycle(capture);
            self.builder.end_validation();
            self.transition(RenderState::Preview);
        }
    }

    fn apply_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);

        if let Some(id) = pending.camera_plugin {
            self.plugins.select(PluginKind::Camera, &id);
        }
        if let Some(id) = pending.preview_plugin {
            self.plugins.select(PluginKind::Preview, &id);
        }
        if let Some(state) = pending.zoom {
            self.zoom.set_state(state);
        }

        let mut resized = false;
        if let Some(size) = pending.preview_size {
            if size != self.preview_size && !size.is_empty() {
                self.preview_size = size;
                resized = true;
            }
        }
        let mut rotated = false;
        if let Some(orientation) = pending.orientation {
            if orientation != self.orientation {
                self.orientation = orientation;
                rotated = true;
            }
        }

        if resized {
            self.viewport = viewport(self.surface, self.preview_size);
            self.compositor.resize(self.surface, self.viewport);
        }
        if resized || rotated {
            self.zone = capture_zone(self.viewport, self.orientation, self.capture_ratio);
            debug!(
                "Viewport {:?}, capture zone {:?} ({}°)",
                self.viewport,
                self.zone,
                self.orientation.degrees()
            );
        }
    }

    /// Capture zone in surface coordinates
    fn zone_on_surface(&self) -> Rect {
        Rect::new(
            self.viewport.x + self.zone.x,
            self.viewport.y + self.zone.y,
            self.zone.width,
            self.zone.height,
        )
    }

    /// Renders one frame and advances the capture state machine
    pub fn tick(&mut self) -> ControlFlow<()> {
        if self.state == RenderState::Error {
            return ControlFlow::Break(());
        }
        let started = Instant::now();

        let zoom = if self.state == RenderState::Preview {
            self.apply_pending();
            self.zoom.step()
        } else {
            self.zoom.factor()
        };

        let viewport = self.viewport;
        let orientation = self.orientation;
        let camera = self.plugins.active(PluginKind::Camera).to_string();
        self.compositor
            .draw(PluginKind::Camera, &camera, viewport, orientation, zoom);

        if self.state == RenderState::CaptureNextFrame {
            self.read_back();
        }

        let preview = self.plugins.active(PluginKind::Preview).to_string();
        self.compositor
            .draw(PluginKind::Preview, &preview, viewport, orientation, zoom);

        if self.state == RenderState::ValidationDone {
            self.hand_off();
        }

        let ui = self.plugins.active(PluginKind::Ui).to_string();
        let zone = self.zone_on_surface();
        self.compositor
            .draw(PluginKind::Ui, &ui, zone, orientation, zoom);

        if !self.compositor.present() {
            error!("Failed to present frame, shutting down");
            self.transition(RenderState::Error);
            let _ = self.host.send(HostEvent::SystemError {
                source: ActorKind::Renderer,
                error: PipelineError::Presentation,
            });
            if let Some(validator) = &self.validator {
                let _ = validator.send(ValidatorMessage::Shutdown);
            }
            return ControlFlow::Break(());
        }

        metrics::histogram!("render_time_us").record(started.elapsed().as_micros() as f64);
        ControlFlow::Continue(())
    }

    /// Runs once per CAPTURE_NEXT_FRAME entry: the state leaves
    /// CAPTURE_NEXT_FRAME whatever the outcome.
    #[instrument(skip(self), fields(zone = ?self.zone))]
    fn read_back(&mut self) {
        let Some(mut capture) = self.in_flight.take() else {
            warn!("No capture to read back");
            self.abandon(None);
            return;
        };

        let zone = self.zone;
        let buffers = self.builder.buffers().clone();
        let mut pixels = buffers.acquire(zone.rgba_len());

        let started = Instant::now();
        if let Err(e) = self.compositor.read_pixels(zone, &mut pixels) {
            warn!("Readback failed: {}", e);
            buffers.release(pixels);
            self.abandon(Some(capture));
            return;
        }
        self.readbacks += 1;
        metrics::histogram!("readback_time_us").record(started.elapsed().as_micros() as f64);

        capture.pixels = Some(pixels);
        let Some(validator) = &self.validator else {
            warn!("No validator connected, dropping capture");
            self.abandon(Some(capture));
            return;
        };

        match validator.send(ValidatorMessage::ValidationRequest(capture)) {
            Ok(()) => self.transition(RenderState::ValidationInProgress),
            Err(flume::SendError(message)) => {
                warn!("Validator gone, dropping capture");
                match message {
                    ValidatorMessage::ValidationRequest(capture) => self.abandon(Some(capture)),
                    ValidatorMessage::Shutdown => self.abandon(None),
                }
            }
        }
    }

    /// Gives up on the in-flight capture and frees the validation slot
    fn abandon(&mut self, capture: Option<Capture>) {
        if let Some(capture) = capture {
            self.builder.recycle(capture);
        }
        self.builder.end_validation();
        self.transition(RenderState::Preview);
    }

    fn hand_off(&mut self) {
        if let Some(capture) = self.done.take() {
            self.sink.accept(capture);
        }
        self.builder.end_validation();
        self.transition(RenderState::Preview);
    }

    /// Releases the compositor and every capture still held here
    pub fn shutdown(&mut self) {
        for capture in [self.in_flight.take(), self.done.take(), self.preview.take()]
            .into_iter()
            .flatten()
        {
            self.builder.recycle(capture);
        }
        if matches!(
            self.state,
            RenderState::CaptureNextFrame
                | RenderState::ValidationInProgress
                | RenderState::ValidationDone
        ) {
            self.builder.end_validation();
        }
        self.compositor.release();
        info!("Renderer released after {} readbacks", self.readbacks);
    }

    /// Message loop with a compositor tick every `interval`. Ticks are due
    /// even while messages keep arriving. Captures still queued on exit go
    /// back to the pool.
    pub fn run(mut self, mailbox: Receiver<RenderMessage>, interval: Duration) {
        info!("Renderer running, frame interval {:?}", interval);
        let mut next_tick = Instant::now() + interval;

        loop {
            let now = Instant::now();
            if now >= next_tick {
                if self.tick().is_break() {
                    break;
                }
                next_tick += interval;
                if next_tick <= now {
                    next_tick = now + interval;
                }
                continue;
            }

            match mailbox.recv_deadline(next_tick) {
                Ok(message) => {
                    if self.handle(message).is_break() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Renderer mailbox closed");
                    break;
                }
            }
        }

        for message in mailbox.drain() {
            if let RenderMessage::CaptureNextFrame(capture)
            | RenderMessage::ChangeCapture(capture)
            | RenderMessage::ValidationResult(capture) = message
            {
                self.builder.recycle(capture);
            }
        }
        self.shutdown();
    }

    /// Runs the orchestrator on its own thread
    pub fn spawn(
        self,
        mailbox: Receiver<RenderMessage>,
        handle: Sender<RenderMessage>,
        interval: Duration,
    ) -> Result<JoinHandle<()>> {
        let host = self.host.clone();
        thread::Builder::new()
            .name("capture-renderer".into())
            .spawn(move || {
                let _ = host.send(HostEvent::ConnectRenderer(handle));
                self.run(mailbox, interval);
                let _ = host.send(HostEvent::Stopped(ActorKind::Renderer));
            })
            .map_err(|e| PipelineError::Spawn("renderer", e.to_string()))
    }
}
