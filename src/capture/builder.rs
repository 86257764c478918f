//! Double-buffered capture snapshot builder
//!
//! The camera metadata thread writes into a private staging record as each
//! frame's results arrive. Consumers only ever see the published record,
//! which is refreshed from staging on an explicit [`publish`] when staging
//! is dirty. Both records, the pool of spare records handed out as
//! snapshots, and the single-flight validation slot sit behind one lock.
//!
//! [`publish`]: CaptureSnapshotBuilder::publish

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::frame::FrameMetadata;
use super::pool::BufferAllocator;
use super::record::{Capture, ValidationState};

struct BuilderState {
    staging: Capture,
    published: Capture,
    dirty: bool,
    /// Spare records, reused for snapshots
    free: Vec<Capture>,
    /// Records handed out and not yet recycled
    leased: usize,
    /// Validation state of the one capture allowed in flight
    validation: ValidationState,
}

pub struct CaptureSnapshotBuilder {
    state: Mutex<BuilderState>,
    buffers: Arc<dyn BufferAllocator>,
    max_free: usize,
}

impl CaptureSnapshotBuilder {
    pub fn new(buffers: Arc<dyn BufferAllocator>, pool_size: usize) -> Self {
        let free = (0..pool_size).map(|_| Capture::default()).collect();
        Self {
            state: Mutex::new(BuilderState {
                staging: Capture::default(),
                published: Capture::default(),
                dirty: false,
                free,
                leased: 0,
                validation: ValidationState::Wait,
            }),
            buffers,
            max_free: pool_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BuilderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stages readiness derived from one frame's metadata
    pub fn build(&self, metadata: &FrameMetadata) {
        let mut state = self.lock();
        if let Some(pixels) = state.staging.pixels.take() {
            self.buffers.release(pixels);
        }

        let camera = metadata.camera_readiness();
        state.staging.camera = camera.camera;
        state.staging.light = camera.light;
        state.staging.faces = metadata.face_readiness();
        state.dirty = true;
    }

    /// Synchronizes the published record from staging if it changed, and
    /// returns a pooled copy of it. Snapshots always start out in
    /// `ValidationState::Wait`; the slot state is read with
    /// [`validation_slot`](Self::validation_slot).
    pub fn publish(&self) -> Capture {
        let mut state = self.lock();
        let state = &mut *state;

        if state.dirty {
            state.published.camera = state.staging.camera;
            state.published.light = state.staging.light;
            state.published.faces = state.staging.faces;
            if let Some(pixels) = state.published.pixels.take() {
                self.buffers.release(pixels);
            }
            state.dirty = false;
        }

        let mut snapshot = state.free.pop().unwrap_or_default();
        snapshot.copy_metadata_from(&state.published);
        snapshot.validation = ValidationState::Wait;
        state.leased += 1;
        snapshot
    }

    /// Returns a record to the pool, its pixel buffer to the allocator
    pub fn recycle(&self, mut capture: Capture) {
        if let Some(pixels) = capture.reset() {
            self.buffers.release(pixels);
        }

        let mut state = self.lock();
        state.leased = state.leased.saturating_sub(1);
        if state.free.len() < self.max_free {
            state.free.push(capture);
        }
    }

    /// Claims the single validation slot. Returns `false` if a capture is
    /// already in flight.
    pub fn begin_validation(&self) -> bool {
        let mut state = self.lock();
        if state.validation != ValidationState::Wait {
            warn!(
                "Validation slot already taken ({:?}), refusing second capture",
                state.validation
            );
            return false;
        }
        state.validation = ValidationState::InProgress;
        true
    }

    /// Releases the validation slot, new captures may be gated again
    pub fn end_validation(&self) {
        let mut state = self.lock();
        if state.validation == ValidationState::Wait {
            debug!("Validation slot released twice");
        }
        state.validation = ValidationState::Wait;
    }

    pub fn is_validating(&self) -> bool {
        self.lock().validation != ValidationState::Wait
    }

    /// State of the single-flight slot, `Wait` when no capture is in flight
    pub fn validation_slot(&self) -> ValidationState {
        self.lock().validation
    }

    /// Snapshot records currently owned outside the builder
    pub fn leased(&self) -> usize {
        self.lock().leased
    }

    pub fn buffers(&self) -> &Arc<dyn BufferAllocator> {
        &self.buffers
    }
}
