//! Auto-capture pipeline driven by simulated camera and accelerometer feeds

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use autocapture::analysis::AcceptAll;
use autocapture::capture::frame::{ExposureState, FocusState, LensState, WhiteBalanceState};
use autocapture::capture::{BufferPool, Capture, CaptureSnapshotBuilder, FrameMetadata};
use autocapture::device::{CameraDevice, CameraSession, DeviceLock};
use autocapture::pipeline::{FrameProducer, HostEvent, Pipeline, RenderMessage, SensorFeed};
use autocapture::render::{Size, SoftwareCompositor};
use autocapture::sensor::motion::GRAVITY_EARTH;
use autocapture::{Config, DeviceError};
use color_eyre::{eyre::eyre, Result};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Camera with a fixed list of stream sizes and nothing behind it
struct SimulatedCamera;

impl CameraDevice for SimulatedCamera {
    fn preview_sizes(&self) -> Vec<Size> {
        vec![
            Size::new(3840, 2160),
            Size::new(1920, 1080),
            Size::new(1440, 1080),
            Size::new(1280, 720),
            Size::new(640, 480),
        ]
    }

    fn open(&mut self, _preview: Size) -> std::result::Result<(), DeviceError> {
        Ok(())
    }

    fn close(&mut self) {}
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("autocapture=debug"));
    let registry = tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()),
    );

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

/// Camera metadata at ~30fps: focus hunts for half a second every three
/// seconds, everything else settled.
fn spawn_camera_feed(
    mut producer: FrameProducer,
    running: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("camera-metadata".into())
        .spawn(move || {
            let mut sequence = 0u64;
            while running.load(Ordering::Relaxed) {
                let hunting = sequence % 90 < 15;
                let metadata = FrameMetadata {
                    sequence,
                    focus: Some(if hunting {
                        FocusState::PassiveScan
                    } else {
                        FocusState::PassiveFocused
                    }),
                    exposure: Some(ExposureState::Converged),
                    white_balance: Some(WhiteBalanceState::Converged),
                    lens: Some(if hunting {
                        LensState::Moving
                    } else {
                        LensState::Stationary
                    }),
                    faces: Some(1),
                };
                producer.on_capture_completed(&metadata);
                sequence += 1;
                thread::sleep(Duration::from_millis(33));
            }
        })?;
    Ok(handle)
}

/// Accelerometer at ~100Hz: held upright with slight tremor, shaken into
/// landscape and back every ten seconds.
fn spawn_sensor_feed(
    mut sensor: SensorFeed,
    running: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("accelerometer".into())
        .spawn(move || {
            let mut tick = 0u64;
            while running.load(Ordering::Relaxed) {
                let t = tick as f32 / 100.0;
                let tremor = 0.05 * (t * 7.0).sin();
                let sample = match tick % 1000 {
                    400..=419 => [if tick % 2 == 0 { 14.0 } else { 6.0 }, 1.0, 0.5],
                    420..=599 => [GRAVITY_EARTH + tremor, 0.3, 0.5],
                    600..=619 => [1.0, if tick % 2 == 0 { 14.0 } else { 6.0 }, 0.5],
                    _ => [tremor, GRAVITY_EARTH, 0.5 + tremor],
                };
                sensor.on_sample(sample);
                tick += 1;
                thread::sleep(Duration::from_millis(10));
            }
        })?;
    Ok(handle)
}

fn save_capture(directory: &Path, index: u64, capture: &Capture) -> Result<PathBuf> {
    let pixels = capture
        .pixels
        .as_ref()
        .ok_or_else(|| eyre!("validated capture without pixels"))?;
    std::fs::create_dir_all(directory)?;
    let path = directory.join(format!("capture_{:05}.png", index));
    image::save_buffer(
        &path,
        pixels,
        capture.width,
        capture.height,
        image::ColorType::Rgba8,
    )?;
    Ok(path)
}

fn spawn_save(
    saves: &mut JoinSet<()>,
    builder: Arc<CaptureSnapshotBuilder>,
    directory: PathBuf,
    index: u64,
    capture: Capture,
) {
    saves.spawn_blocking(move || {
        match save_capture(&directory, index, &capture) {
            Ok(path) => info!("Saved {}", path.display()),
            Err(e) => warn!("Failed to save capture {}: {}", index, e),
        }
        builder.recycle(capture);
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    info!("Auto-capture launching...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    debug!("{:?}", config);

    let buffers = Arc::new(BufferPool::new(config.capture.buffer_pool_size));
    let mut pipeline = Pipeline::start(
        &config,
        Box::new(SoftwareCompositor::new()),
        Box::new(AcceptAll),
        buffers.clone(),
    )?;

    let mut producer = pipeline
        .take_producer()
        .ok_or_else(|| eyre!("frame producer already taken"))?;
    let sensor = pipeline
        .take_sensor()
        .ok_or_else(|| eyre!("sensor feed already taken"))?;

    let surface = Size::new(config.render.surface_width, config.render.surface_height);
    let mut session = CameraSession::new(
        SimulatedCamera,
        Arc::new(DeviceLock::new()),
        config.device.clone(),
    );
    match session.open(surface) {
        Ok(preview) => {
            let _ = pipeline
                .renderer()
                .send(RenderMessage::ChangePreviewSize(preview));
        }
        Err(e) => producer.on_device_error(e),
    }

    let running = Arc::new(AtomicBool::new(true));
    let camera_thread = spawn_camera_feed(producer, running.clone())?;
    let sensor_thread = spawn_sensor_feed(sensor, running.clone())?;

    let events = pipeline.events().clone();
    let mut saves = JoinSet::new();
    let mut saved = 0u64;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            event = events.recv_async() => match event {
                Ok(HostEvent::CaptureValidated(capture)) => {
                    if config.output.save_captures {
                        spawn_save(
                            &mut saves,
                            pipeline.builder().clone(),
                            config.output.directory.clone(),
                            saved,
                            capture,
                        );
                    } else {
                        info!("Capture validated: {:?}", capture);
                        pipeline.recycle(capture);
                    }
                    saved += 1;
                }
                Ok(HostEvent::SystemError { source, error }) => {
                    error!("{:?} failed: {}", source, error);
                    if error.is_fatal() {
                        break;
                    }
                }
                Ok(event) => debug!("{:?}", event),
                Err(_) => break,
            },
        }
    }

    running.store(false, Ordering::Relaxed);
    tokio::task::spawn_blocking(move || {
        for handle in [camera_thread, sensor_thread] {
            if handle.join().is_err() {
                warn!("Feed thread panicked");
            }
        }
    })
    .await?;
    while saves.join_next().await.is_some() {}

    session.close()?;
    let builder = pipeline.builder().clone();
    tokio::task::spawn_blocking(move || pipeline.shutdown()).await??;
    for event in events.try_iter() {
        if let HostEvent::CaptureValidated(capture) = event {
            builder.recycle(capture);
        }
    }

    let (allocated, reused, outstanding) = buffers.stats();
    info!(
        "Auto-capture shutting down: {} captures, {} buffers allocated, {} reused, {} outstanding",
        saved, allocated, reused, outstanding
    );
    Ok(())
}
