use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use autocapture::analysis::{AcceptAll, Analyzer, AnalyzerError};
use autocapture::capture::{
    BufferAllocator, Capture, CaptureSnapshotBuilder, FrameMetadata, ValidationState,
};
use autocapture::pipeline::{
    Emitted, FrameProducer, HostEvent, Pipeline, RenderMessage, RenderOrchestrator, RenderState,
    ValidationActor, ValidatorMessage,
};
use autocapture::render::SoftwareCompositor;
use autocapture::sensor::{MotionSlot, Orientation};
use autocapture::{CaptureConfig, Config, RenderConfig, ValidationConfig};
use bytes::BytesMut;
use flume::{Receiver, Sender};

/// Allocator that only counts, so leaks show up as a non-zero balance
#[derive(Default)]
struct CountingAllocator {
    live: AtomicUsize,
    acquired: AtomicUsize,
}

impl BufferAllocator for CountingAllocator {
    fn acquire(&self, len: usize) -> BytesMut {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.acquired.fetch_add(1, Ordering::SeqCst);
        BytesMut::zeroed(len)
    }

    fn release(&self, _buffer: BytesMut) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    fn outstanding(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

fn ready(sequence: u64) -> FrameMetadata {
    FrameMetadata {
        faces: Some(1),
        ..FrameMetadata::settled(sequence)
    }
}

fn small_config() -> Config {
    let mut config = Config::default();
    config.capture.throttle_frames = 1;
    config.render.surface_width = 90;
    config.render.surface_height = 160;
    config.render.frame_interval_ms = 2;
    config
}

/// Analyzer scripted by call number: odd calls succeed, even calls fail,
/// every third call panics.
fn scripted(calls: Arc<AtomicUsize>) -> impl Analyzer {
    move |capture: &mut Capture| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        assert_eq!(capture.validation, ValidationState::InProgress);
        if n % 3 == 0 {
            panic!("analyzer crashed on call {}", n);
        }
        if n % 2 == 1 {
            Ok(ValidationState::Succeeded)
        } else {
            Err(AnalyzerError::Failed("no document".into()))
        }
    }
}

/// All three actors stepped by hand on one thread, with every queued
/// message visible between steps.
struct Simulation {
    allocator: Arc<CountingAllocator>,
    builder: Arc<CaptureSnapshotBuilder>,
    producer: FrameProducer,
    renderer: RenderOrchestrator,
    validator: ValidationActor,
    render_rx: Receiver<RenderMessage>,
    validator_rx: Receiver<ValidatorMessage>,
    render_queue: VecDeque<RenderMessage>,
    validator_queue: VecDeque<ValidatorMessage>,
    accepted: Arc<AtomicUsize>,
    requests: usize,
    replies: usize,
    _orientations: Sender<Orientation>,
    _host: Receiver<HostEvent>,
    sequence: u64,
}

impl Simulation {
    fn new(analyzer: Box<dyn Analyzer>) -> Self {
        let allocator = Arc::new(CountingAllocator::default());
        let builder = Arc::new(CaptureSnapshotBuilder::new(allocator.clone(), 4));
        let (host_tx, host_rx) = flume::unbounded();
        let (render_tx, render_rx) = flume::unbounded();
        let (validator_tx, validator_rx) = flume::unbounded();
        let (orientation_tx, orientation_rx) = flume::unbounded();

        let accepted = Arc::new(AtomicUsize::new(0));
        let sink = {
            let builder = builder.clone();
            let accepted = accepted.clone();
            move |capture: Capture| {
                assert_eq!(capture.validation, ValidationState::Succeeded);
                assert!(capture.pixels.is_some());
                accepted.fetch_add(1, Ordering::SeqCst);
                builder.recycle(capture);
            }
        };

        let render = RenderConfig {
            surface_width: 90,
            surface_height: 160,
            ..RenderConfig::default()
        };
        let capture = CaptureConfig {
            throttle_frames: 1,
            ..CaptureConfig::default()
        };
        let mut renderer = RenderOrchestrator::new(
            &render,
            &capture,
            Box::new(SoftwareCompositor::new()),
            builder.clone(),
            Box::new(sink),
            host_tx.clone(),
        );
        let _ = renderer.handle(RenderMessage::ConnectValidator(validator_tx));

        let validator = ValidationActor::new(
            analyzer,
            render_tx.clone(),
            builder.clone(),
            &ValidationConfig::default(),
        );
        let producer = FrameProducer::new(
            &capture,
            builder.clone(),
            MotionSlot::new(),
            orientation_rx,
            render_tx,
            host_tx,
        );

        Self {
            allocator,
            builder,
            producer,
            renderer,
            validator,
            render_rx,
            validator_rx,
            render_queue: VecDeque::new(),
            validator_queue: VecDeque::new(),
            accepted,
            requests: 0,
            replies: 0,
            _orientations: orientation_tx,
            _host: host_rx,
            sequence: 0,
        }
    }

    fn pump(&mut self) {
        self.render_queue.extend(self.render_rx.try_iter());
        self.validator_queue.extend(self.validator_rx.try_iter());
    }

    /// Captures between gate acceptance and the renderer consuming the reply
    fn in_flight(&self) -> usize {
        let accepted = usize::from(self.renderer.state() == RenderState::CaptureNextFrame);
        let requests = self
            .validator_queue
            .iter()
            .filter(|m| matches!(m, ValidatorMessage::ValidationRequest(_)))
            .count();
        let replies = self
            .render_queue
            .iter()
            .filter(|m| matches!(m, RenderMessage::ValidationResult(_)))
            .count();
        accepted + requests + replies
    }

    /// Every capture record visible anywhere in the simulation that is
    /// marked IN_PROGRESS
    fn in_progress(&self) -> usize {
        let render_queue = self.render_queue.iter().filter_map(|m| match m {
            RenderMessage::CaptureNextFrame(c)
            | RenderMessage::ChangeCapture(c)
            | RenderMessage::ValidationResult(c) => Some(c),
            _ => None,
        });
        let validator_queue = self.validator_queue.iter().filter_map(|m| match m {
            ValidatorMessage::ValidationRequest(c) => Some(c),
            ValidatorMessage::Shutdown => None,
        });
        render_queue
            .chain(validator_queue)
            .chain(self.renderer.preview_capture())
            .chain(self.renderer.held_capture())
            .filter(|c| c.validation == ValidationState::InProgress)
            .count()
    }

    fn frame(&mut self) -> Option<Emitted> {
        self.sequence += 1;
        let emitted = self.producer.on_capture_completed(&ready(self.sequence));
        self.pump();
        emitted
    }

    fn render_message(&mut self) -> bool {
        match self.render_queue.pop_front() {
            Some(message) => {
                let _ = self.renderer.handle(message);
                self.pump();
                true
            }
            None => false,
        }
    }

    fn tick(&mut self) {
        let _ = self.renderer.tick();
        self.pump();
    }

    fn validate(&mut self) -> bool {
        let Some(message) = self.validator_queue.pop_front() else {
            return false;
        };
        let is_request = matches!(message, ValidatorMessage::ValidationRequest(_));
        let before = self.render_rx.len();
        let _ = self.validator.handle(message);
        if is_request {
            self.requests += 1;
            self.replies += self.render_rx.len() - before;
            assert_eq!(self.requests, self.replies, "exactly one reply per request");
        }
        self.pump();
        true
    }

    /// Steps renderer and validator until nothing is queued or in flight
    fn settle(&mut self) {
        for _ in 0..1000 {
            let busy = self.render_message() | self.validate();
            if !busy {
                if self.renderer.state() == RenderState::Preview {
                    return;
                }
                self.tick();
            }
        }
        panic!("pipeline did not settle: {:?}", self.renderer.state());
    }

    fn finish(mut self) -> (Arc<CountingAllocator>, Arc<CaptureSnapshotBuilder>) {
        self.settle();
        self.renderer.shutdown();
        (self.allocator, self.builder)
    }
}

/// Deterministic pseudo-random schedule
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, n: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) % n
    }
}

#[test]
fn test_single_flight_under_arbitrary_interleaving() {
    for seed in [1u64, 7, 42, 1234] {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sim = Simulation::new(Box::new(scripted(calls.clone())));
        let mut schedule = Lcg(seed);

        for _ in 0..3000 {
            match schedule.next(5) {
                0 => {
                    sim.frame();
                }
                1 | 2 => {
                    sim.render_message();
                }
                3 => sim.tick(),
                _ => {
                    sim.validate();
                }
            }
            assert!(sim.in_progress() <= 1, "seed {}: two captures in progress", seed);
            assert!(sim.in_flight() <= 1, "seed {}: two captures in flight", seed);
        }

        let accepted = sim.accepted.clone();
        let requests = sim.requests;
        let (allocator, builder) = sim.finish();
        assert!(calls.load(Ordering::SeqCst) > 10, "seed {}: too few analyses", seed);
        assert!(accepted.load(Ordering::SeqCst) > 0);
        assert!(requests >= calls.load(Ordering::SeqCst));
        assert_eq!(allocator.outstanding(), 0, "seed {}: leaked pixel buffers", seed);
        assert_eq!(builder.leased(), 0, "seed {}: leaked capture records", seed);
    }
}

#[test]
fn test_preview_update_during_validation_stays_waiting() {
    let mut sim = Simulation::new(Box::new(AcceptAll));

    assert_eq!(sim.frame(), Some(Emitted::CaptureNextFrame));
    assert!(sim.render_message());
    sim.tick();
    assert_eq!(sim.renderer.state(), RenderState::ValidationInProgress);
    assert_eq!(sim.in_progress(), 1);

    assert_eq!(sim.frame(), Some(Emitted::PreviewUpdate));
    assert_eq!(sim.in_progress(), 1);
    assert!(sim.render_message());
    assert_eq!(
        sim.renderer.preview_capture().map(|c| c.validation),
        Some(ValidationState::Wait)
    );
    assert_eq!(sim.in_progress(), 1, "preview snapshot marked in progress");

    let (allocator, builder) = sim.finish();
    assert_eq!(allocator.outstanding(), 0);
    assert_eq!(builder.leased(), 0);
}

#[test]
fn test_success_cycle_keeps_buffer_baseline() {
    let mut sim = Simulation::new(Box::new(AcceptAll));

    for cycle in 1..=5 {
        assert_eq!(sim.frame(), Some(Emitted::CaptureNextFrame));
        assert!(sim.render_message());
        assert_eq!(sim.renderer.state(), RenderState::CaptureNextFrame);

        sim.tick();
        assert_eq!(sim.renderer.state(), RenderState::ValidationInProgress);
        assert_eq!(sim.allocator.outstanding(), 1);

        assert!(sim.validate());
        assert!(sim.render_message());
        assert_eq!(sim.renderer.state(), RenderState::ValidationDone);

        sim.tick();
        assert_eq!(sim.renderer.state(), RenderState::Preview);
        assert_eq!(sim.accepted.load(Ordering::SeqCst), cycle);
        assert_eq!(sim.allocator.outstanding(), 0);
        assert_eq!(sim.builder.leased(), 0);
    }
    assert_eq!(sim.allocator.acquired.load(Ordering::SeqCst), 5);
}

#[test]
fn test_panicking_analyzer_returns_to_preview() {
    let analyzer = |_: &mut Capture| -> Result<ValidationState, AnalyzerError> {
        panic!("native analyzer crashed")
    };
    let mut sim = Simulation::new(Box::new(analyzer));

    for _ in 0..3 {
        assert_eq!(sim.frame(), Some(Emitted::CaptureNextFrame));
        sim.render_message();
        sim.tick();
        assert!(sim.validate());
        assert_matches::assert_matches!(
            sim.render_queue.front(),
            Some(RenderMessage::ValidationResult(c)) if c.validation == ValidationState::Failed
        );
        sim.render_message();
        assert_eq!(sim.renderer.state(), RenderState::Preview);
        assert!(!sim.builder.is_validating());
    }

    assert_eq!(sim.accepted.load(Ordering::SeqCst), 0);
    let (allocator, builder) = sim.finish();
    assert_eq!(allocator.outstanding(), 0);
    assert_eq!(builder.leased(), 0);
}

#[test]
fn test_touched_screen_never_captures() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut sim = Simulation::new(Box::new(scripted(calls.clone())));
    sim.producer.input_handle().set_touched(true);

    for _ in 0..50 {
        assert_eq!(sim.frame(), Some(Emitted::PreviewUpdate));
        sim.render_message();
        sim.tick();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(sim.renderer.preview_capture().is_some());

    let (allocator, builder) = sim.finish();
    assert_eq!(allocator.acquired.load(Ordering::SeqCst), 0);
    assert_eq!(builder.leased(), 0);
}

fn wait_for<F: FnMut() -> bool>(timeout: Duration, mut done: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn test_threaded_pipeline_delivers_validated_capture() {
    let allocator = Arc::new(CountingAllocator::default());
    let mut pipeline = Pipeline::start(
        &small_config(),
        Box::new(SoftwareCompositor::new()),
        Box::new(AcceptAll),
        allocator.clone(),
    )
    .unwrap();
    let mut producer = pipeline.take_producer().unwrap();
    assert!(pipeline.take_producer().is_none());

    let events = pipeline.events().clone();
    let mut validated = None;
    let mut sequence = 0;
    let found = wait_for(Duration::from_secs(5), || {
        sequence += 1;
        producer.on_capture_completed(&ready(sequence));
        for event in events.try_iter() {
            match event {
                HostEvent::CaptureValidated(capture) if validated.is_none() => {
                    validated = Some(capture)
                }
                HostEvent::CaptureValidated(capture) => pipeline.recycle(capture),
                _ => {}
            }
        }
        validated.is_some()
    });
    assert!(found, "no capture validated");

    let capture = validated.unwrap();
    assert_eq!(capture.validation, ValidationState::Succeeded);
    assert_eq!(capture.plugin_id, "preview_default");
    assert_eq!((capture.width, capture.height), (90, 67));
    assert_eq!(capture.pixels.as_ref().map(|p| p.len()), Some(90 * 67 * 4));
    pipeline.recycle(capture);

    drop(producer);
    let builder = pipeline.builder().clone();
    assert!(wait_for(Duration::from_secs(2), || !builder.is_validating()));
    pipeline.shutdown().unwrap();

    for event in events.try_iter() {
        if let HostEvent::CaptureValidated(capture) = event {
            builder.recycle(capture);
        }
    }
    assert_eq!(allocator.outstanding(), 0);
    assert_eq!(builder.leased(), 0);
}

#[test]
fn test_threaded_pipeline_survives_analyzer_panics() {
    let calls = Arc::new(AtomicUsize::new(0));
    let analyzer = {
        let calls = calls.clone();
        move |_: &mut Capture| -> Result<ValidationState, AnalyzerError> {
            calls.fetch_add(1, Ordering::SeqCst);
            panic!("analyzer crashed")
        }
    };
    let allocator = Arc::new(CountingAllocator::default());
    let mut pipeline = Pipeline::start(
        &small_config(),
        Box::new(SoftwareCompositor::new()),
        Box::new(analyzer),
        allocator.clone(),
    )
    .unwrap();
    let mut producer = pipeline.take_producer().unwrap();

    let mut sequence = 0;
    let retried = wait_for(Duration::from_secs(5), || {
        sequence += 1;
        producer.on_capture_completed(&ready(sequence));
        calls.load(Ordering::SeqCst) >= 3
    });
    assert!(retried, "pipeline stopped retrying after a failed analysis");

    drop(producer);
    let builder = pipeline.builder().clone();
    assert!(wait_for(Duration::from_secs(2), || !builder.is_validating()));

    let events: Vec<HostEvent> = pipeline.events().try_iter().collect();
    assert!(events
        .iter()
        .all(|e| !matches!(e, HostEvent::CaptureValidated(_) | HostEvent::SystemError { .. })));

    pipeline.shutdown().unwrap();
    assert_eq!(allocator.outstanding(), 0);
    assert_eq!(builder.leased(), 0);
}

#[test]
fn test_invalid_config_is_rejected_at_start() {
    let mut config = small_config();
    config.capture.capture_ratio = 0.0;
    let result = Pipeline::start(
        &config,
        Box::new(SoftwareCompositor::new()),
        Box::new(AcceptAll),
        Arc::new(CountingAllocator::default()),
    );
    assert!(result.is_err());
}
