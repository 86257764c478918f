//! Actor wiring.
//!
//! [`Pipeline::start`] builds the shared pools, spawns the renderer and
//! validator on their own threads and connects them. The frame producer and
//! the sensor feed are handed to the host, which drives them from its camera
//! metadata and accelerometer callbacks.

pub mod message;
pub mod orchestrator;
pub mod producer;
pub mod validator;

use std::sync::Arc;
use std::thread::JoinHandle;

use flume::{Receiver, Sender};
use tracing::{info, warn};

use crate::analysis::Analyzer;
use crate::capture::{BufferAllocator, Capture, CaptureSnapshotBuilder};
use crate::error::{PipelineError, Result};
use crate::render::Compositor;
use crate::sensor::{MotionOrientationTracker, MotionSlot, Orientation};
use crate::Config;

pub use message::{ActorKind, HostEvent, RenderMessage, ValidatorMessage};
pub use orchestrator::{RenderOrchestrator, RenderState};
pub use producer::{capture_gate, Emitted, FrameProducer, InputHandle, ProducerState};
pub use validator::{ValidationActor, ValidatorState};

/// Downstream consumer of validated captures. Whoever ends up owning a
/// capture returns it with [`CaptureSnapshotBuilder::recycle`].
pub trait CaptureSink: Send {
    fn accept(&mut self, capture: Capture);
}

impl<F> CaptureSink for F
where
    F: FnMut(Capture) + Send,
{
    fn accept(&mut self, capture: Capture) {
        self(capture)
    }
}

/// Forwards validated captures to the host as [`HostEvent::CaptureValidated`]
pub struct HostSink {
    host: Sender<HostEvent>,
    builder: Arc<CaptureSnapshotBuilder>,
}

impl CaptureSink for HostSink {
    fn accept(&mut self, capture: Capture) {
        if let Err(flume::SendError(event)) = self.host.send(HostEvent::CaptureValidated(capture))
        {
            warn!("Host gone, recycling validated capture");
            if let HostEvent::CaptureValidated(capture) = event {
                self.builder.recycle(capture);
            }
        }
    }
}

/// Accelerometer entry point: updates motion for the producer and queues
/// orientation changes for it.
pub struct SensorFeed {
    tracker: MotionOrientationTracker,
    orientations: Sender<Orientation>,
}

impl SensorFeed {
    pub fn on_sample(&mut self, acceleration: [f32; 3]) {
        if let Some(orientation) = self.tracker.on_sample(acceleration) {
            let _ = self.orientations.send(orientation);
        }
    }

    pub fn tracker(&self) -> &MotionOrientationTracker {
        &self.tracker
    }
}

pub struct Pipeline {
    builder: Arc<CaptureSnapshotBuilder>,
    render: Sender<RenderMessage>,
    validator: Sender<ValidatorMessage>,
    events: Receiver<HostEvent>,
    producer: Option<FrameProducer>,
    sensor: Option<SensorFeed>,
    input: InputHandle,
    validator_thread: JoinHandle<()>,
    renderer_thread: JoinHandle<()>,
}

impl Pipeline {
    /// Starts the pipeline with validated captures surfacing as host events
    pub fn start(
        config: &Config,
        compositor: Box<dyn Compositor>,
        analyzer: Box<dyn Analyzer>,
        buffers: Arc<dyn BufferAllocator>,
    ) -> Result<Self> {
        Self::start_with(config, compositor, analyzer, buffers, |host, builder| {
            Box::new(HostSink { host, builder })
        })
    }

    /// Starts the pipeline with a custom downstream sink
    pub fn start_with<S>(
        config: &Config,
        compositor: Box<dyn Compositor>,
        analyzer: Box<dyn Analyzer>,
        buffers: Arc<dyn BufferAllocator>,
        sink: S,
    ) -> Result<Self>
    where
        S: FnOnce(Sender<HostEvent>, Arc<CaptureSnapshotBuilder>) -> Box<dyn CaptureSink>,
    {
        config.validate()?;

        let builder = Arc::new(CaptureSnapshotBuilder::new(
            buffers,
            config.capture.record_pool_size,
        ));
        let motion = MotionSlot::new();

        let (host_tx, events) = flume::unbounded();
        let (render_tx, render_rx) = flume::unbounded();
        let (validator_tx, validator_rx) = flume::unbounded();
        let (orientation_tx, orientation_rx) = flume::unbounded();

        let validator = ValidationActor::new(
            analyzer,
            render_tx.clone(),
            builder.clone(),
            &config.validation,
        );
        let renderer = RenderOrchestrator::new(
            &config.render,
            &config.capture,
            compositor,
            builder.clone(),
            sink(host_tx.clone(), builder.clone()),
            host_tx.clone(),
        );

        let validator_thread =
            validator.spawn(validator_rx, validator_tx.clone(), host_tx.clone())?;
        let renderer_thread =
            renderer.spawn(render_rx, render_tx.clone(), config.render.frame_interval())?;

        render_tx
            .send(RenderMessage::ConnectValidator(validator_tx.clone()))
            .map_err(|_| PipelineError::Disconnected("renderer"))?;

        let producer = FrameProducer::new(
            &config.capture,
            builder.clone(),
            motion.clone(),
            orientation_rx,
            render_tx.clone(),
            host_tx,
        );
        let input = producer.input_handle();
        let sensor = SensorFeed {
            tracker: MotionOrientationTracker::new(config.motion.clone(), motion),
            orientations: orientation_tx,
        };

        info!("Capture pipeline started");
        Ok(Self {
            builder,
            render: render_tx,
            validator: validator_tx,
            events,
            producer: Some(producer),
            sensor: Some(sensor),
            input,
            validator_thread,
            renderer_thread,
        })
    }

    /// The frame producer, to move onto the camera metadata thread
    pub fn take_producer(&mut self) -> Option<FrameProducer> {
        self.producer.take()
    }

    /// The accelerometer feed, to move onto the sensor thread
    pub fn take_sensor(&mut self) -> Option<SensorFeed> {
        self.sensor.take()
    }

    pub fn input(&self) -> InputHandle {
        self.input.clone()
    }

    pub fn events(&self) -> &Receiver<HostEvent> {
        &self.events
    }

    /// Renderer mailbox, for preview size and plugin changes
    pub fn renderer(&self) -> &Sender<RenderMessage> {
        &self.render
    }

    pub fn builder(&self) -> &Arc<CaptureSnapshotBuilder> {
        &self.builder
    }

    /// Returns a consumed capture and its pixel buffer to the pools
    pub fn recycle(&self, capture: Capture) {
        self.builder.recycle(capture);
    }

    /// Broadcasts SYSTEM_SHUTDOWN and waits for both actors to stop.
    ///
    /// The validator stops first so that its last reply is already queued
    /// for the renderer, which then recycles every capture it still holds.
    pub fn shutdown(self) -> Result<()> {
        info!("Shutting down capture pipeline");
        let _ = self.validator.send(ValidatorMessage::Shutdown);
        let validator = self.validator_thread.join();
        let _ = self.render.send(RenderMessage::Shutdown);
        let renderer = self.renderer_thread.join();

        if validator.is_err() || renderer.is_err() {
            warn!("Actor thread panicked during shutdown");
            return Err(PipelineError::Disconnected("actor thread panicked"));
        }
        Ok(())
    }
}
