//! Camera device access: timed open/close lock and preview size selection

use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender};
use tracing::{info, instrument, warn};

use crate::error::DeviceError;
use crate::render::Size;
use crate::DeviceConfig;

/// Exclusive lock around opening and closing the physical camera.
///
/// A single token circulates through a one-slot channel; acquiring waits
/// for it with a deadline.
pub struct DeviceLock {
    token_tx: Sender<()>,
    token_rx: Receiver<()>,
}

/// Held while the device is being opened or closed
pub struct DeviceLockGuard<'a> {
    lock: &'a DeviceLock,
}

impl DeviceLock {
    pub fn new() -> Self {
        let (token_tx, token_rx) = flume::bounded(1);
        let _ = token_tx.try_send(());
        Self { token_tx, token_rx }
    }

    pub fn acquire(&self, timeout: Duration) -> Result<DeviceLockGuard<'_>, DeviceError> {
        self.token_rx
            .recv_timeout(timeout)
            .map_err(|_| DeviceError::LockTimeout(timeout))?;
        Ok(DeviceLockGuard { lock: self })
    }

    pub fn is_held(&self) -> bool {
        self.token_rx.is_empty()
    }
}

impl Default for DeviceLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeviceLockGuard<'_> {
    fn drop(&mut self) {
        let _ = self.lock.token_tx.try_send(());
    }
}

/// Physical camera as seen by the pipeline host
pub trait CameraDevice: Send {
    /// Output sizes the sensor can stream
    fn preview_sizes(&self) -> Vec<Size>;

    fn open(&mut self, preview: Size) -> Result<(), DeviceError>;

    fn close(&mut self);
}

/// Opens and closes a [`CameraDevice`] under a [`DeviceLock`]
pub struct CameraSession<D: CameraDevice> {
    device: D,
    lock: Arc<DeviceLock>,
    config: DeviceConfig,
    open: bool,
}

impl<D: CameraDevice> CameraSession<D> {
    pub fn new(device: D, lock: Arc<DeviceLock>, config: DeviceConfig) -> Self {
        Self {
            device,
            lock,
            config,
            open: false,
        }
    }

    /// Opens the device with the preview size best matching `surface`
    #[instrument(skip(self))]
    pub fn open(&mut self, surface: Size) -> Result<Size, DeviceError> {
        let _guard = self.lock.acquire(self.config.lock_timeout())?;

        let choices = self.device.preview_sizes();
        let preview =
            choose_preview_size(&choices, surface, &self.config).ok_or(DeviceError::NotFound)?;

        if self.open {
            return Ok(preview);
        }

        self.device.open(preview)?;
        self.open = true;
        info!("Camera open, preview {}x{}", preview.width, preview.height);
        Ok(preview)
    }

    pub fn close(&mut self) -> Result<(), DeviceError> {
        let _guard = self.lock.acquire(self.config.lock_timeout())?;
        if self.open {
            self.device.close();
            self.open = false;
            info!("Camera closed");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

fn aspect(size: Size) -> f32 {
    size.height as f32 / size.width as f32
}

/// Picks a camera output size for a portrait `surface`.
///
/// Sizes larger than the configured maximum or than the surface itself are
/// never chosen. Sizes whose rotated aspect ratio matches the surface are
/// preferred. In auto mode the largest matching size wins, or failing that
/// the smallest size still covering the surface width. In manual mode
/// `quality_level` counts up from the lowest quality.
pub fn choose_preview_size(choices: &[Size], surface: Size, config: &DeviceConfig) -> Option<Size> {
    if choices.is_empty() || surface.is_empty() {
        return None;
    }

    let mut sorted: Vec<Size> = choices.to_vec();
    sorted.sort_by(|a, b| b.area().cmp(&a.area()));

    let surface_aspect = surface.width as f32 / surface.height as f32;
    let (best, others): (Vec<Size>, Vec<Size>) = sorted
        .iter()
        .copied()
        .filter(|s| {
            !s.is_empty()
                && s.width <= config.max_preview_width
                && s.height <= config.max_preview_height
                && s.area() <= surface.area()
        })
        .partition(|s| (aspect(*s) - surface_aspect).abs() < 1e-3);

    if config.auto_quality {
        if let Some(size) = best.first() {
            return Some(*size);
        }
        let covering = others
            .iter()
            .take_while(|s| s.height >= surface.width)
            .last()
            .copied();
        return covering.or_else(|| others.first().copied()).or_else(|| {
            warn!("No preview size fits the surface, using the smallest available");
            sorted.last().copied()
        });
    }

    let levels = config.quality_levels.max(1);
    let level = config.quality_level.min(levels - 1);
    if level == 0 {
        return sorted.last().copied();
    }

    // Highest quality first
    let index = levels - 1 - level;
    if let Some(size) = best.get(index) {
        return Some(*size);
    }

    let fallback: Vec<Size> = match best.first() {
        Some(top) => others
            .into_iter()
            .filter(|s| s.width <= top.width && s.height <= top.height)
            .collect(),
        None => others,
    };
    if fallback.is_empty() {
        return best.last().copied().or_else(|| sorted.last().copied());
    }
    fallback.get(index.min(fallback.len() - 1)).copied()
}
