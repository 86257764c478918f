//! Accelerometer filtering into movement and orientation

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use super::orientation::{Orientation, OrientationFilter};
use crate::MotionConfig;

/// Standard gravity, m/s²
pub const GRAVITY_EARTH: f32 = 9.806_65;

/// Latest motion state, as seen by the frame producer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub gravity: [f32; 3],
    pub movement: f32,
    pub moving: bool,
}

impl Default for MotionSample {
    fn default() -> Self {
        Self {
            gravity: [0.0, GRAVITY_EARTH, 0.0],
            movement: 0.0,
            moving: false,
        }
    }
}

/// Lock-free handoff of the latest [`MotionSample`] from the sensor thread
/// to the camera metadata thread.
#[derive(Clone, Default)]
pub struct MotionSlot(Arc<ArcSwap<MotionSample>>);

impl MotionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, sample: MotionSample) {
        self.0.store(Arc::new(sample));
    }

    pub fn load(&self) -> MotionSample {
        **self.0.load()
    }
}

pub struct MotionOrientationTracker {
    config: MotionConfig,
    previous_magnitude: f32,
    current_magnitude: f32,
    movement: f32,
    gravity: [f32; 3],
    orientation: OrientationFilter,
    slot: MotionSlot,
}

impl MotionOrientationTracker {
    pub fn new(config: MotionConfig, slot: MotionSlot) -> Self {
        let orientation = OrientationFilter::new(config.flat_enter, config.flat_exit);
        Self {
            config,
            previous_magnitude: GRAVITY_EARTH,
            current_magnitude: GRAVITY_EARTH,
            movement: 0.0,
            gravity: [0.0, GRAVITY_EARTH, 0.0],
            orientation,
            slot,
        }
    }

    /// Feeds one raw acceleration sample.
    ///
    /// Returns the new orientation when it changed. Orientation is only
    /// re-evaluated under strong movement, so a device held still at an
    /// angle keeps its last orientation.
    pub fn on_sample(&mut self, acceleration: [f32; 3]) -> Option<Orientation> {
        let [x, y, z] = acceleration;
        self.gravity = acceleration;
        self.previous_magnitude = self.current_magnitude;
        self.current_magnitude = (x * x + y * y + z * z).sqrt();

        let delta = (self.current_magnitude - self.previous_magnitude).abs();
        self.movement = self.movement * self.config.smoothing + delta;

        self.slot.store(MotionSample {
            gravity: self.gravity,
            movement: self.movement,
            moving: self.is_moving(),
        });

        if self.movement <= self.config.orientation_change_threshold {
            return None;
        }

        let previous = self.orientation.current();
        let current = self.orientation.update(acceleration);
        if current != previous {
            debug!(
                "Orientation {} -> {} (movement {:.2})",
                previous.degrees(),
                current.degrees(),
                self.movement
            );
            Some(current)
        } else {
            None
        }
    }

    pub fn movement(&self) -> f32 {
        self.movement
    }

    pub fn is_moving(&self) -> bool {
        self.movement > self.config.movement_threshold
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation.current()
    }

    pub fn gravity(&self) -> [f32; 3] {
        self.gravity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (MotionSlot, MotionOrientationTracker) {
        let slot = MotionSlot::new();
        let tracker = MotionOrientationTracker::new(MotionConfig::default(), slot.clone());
        (slot, tracker)
    }

    #[test]
    fn test_still_device_is_not_moving() {
        let (slot, mut tracker) = tracker();
        for _ in 0..50 {
            assert_eq!(tracker.on_sample([0.0, GRAVITY_EARTH, 0.0]), None);
        }
        assert!(tracker.movement() < 1e-3);
        assert!(!tracker.is_moving());
        assert!(!slot.load().moving);
    }

    #[test]
    fn test_movement_is_exponentially_smoothed() {
        let (_, mut tracker) = tracker();
        tracker.on_sample([0.0, GRAVITY_EARTH + 1.5, 0.0]);
        assert!((tracker.movement() - 1.5).abs() < 1e-4);
        assert!(tracker.is_moving());

        // Same magnitude again: delta is zero, movement decays by 0.9
        tracker.on_sample([0.0, GRAVITY_EARTH + 1.5, 0.0]);
        assert!((tracker.movement() - 1.35).abs() < 1e-4);

        for _ in 0..40 {
            tracker.on_sample([0.0, GRAVITY_EARTH + 1.5, 0.0]);
        }
        assert!(!tracker.is_moving());
    }

    #[test]
    fn test_slot_sees_latest_sample() {
        let (slot, mut tracker) = tracker();
        tracker.on_sample([1.0, 2.0, 3.0]);
        let sample = slot.load();
        assert_eq!(sample.gravity, [1.0, 2.0, 3.0]);
        assert_eq!(sample.movement, tracker.movement());
    }

    #[test]
    fn test_gentle_turn_keeps_orientation() {
        let (_, mut tracker) = tracker();
        // (0,10,0) -> (9,0,0) -> (0,10,0): the sideways sample arrives while
        // movement is still under the orientation threshold, so only the
        // final upright sample is evaluated and nothing changes
        assert_eq!(tracker.on_sample([0.0, 10.0, 0.0]), None);
        assert_eq!(tracker.on_sample([9.0, 0.0, 0.0]), None);
        assert_eq!(tracker.on_sample([0.0, 10.0, 0.0]), None);
        assert_eq!(tracker.orientation(), Orientation::Deg0);
    }

    #[test]
    fn test_shake_changes_orientation_once() {
        let (_, mut tracker) = tracker();
        // A hard jolt while turned to the right
        assert_eq!(tracker.on_sample([14.0, 0.0, 0.0]), Some(Orientation::Deg90));
        // Still moving, same orientation: no repeated event
        assert_eq!(tracker.on_sample([9.0, 0.5, 0.0]), None);
        // Back upright while movement is still high
        assert_eq!(tracker.on_sample([0.0, 14.0, 0.0]), Some(Orientation::Deg0));
    }

    #[test]
    fn test_flat_device_never_emits() {
        let (_, mut tracker) = tracker();
        assert_eq!(tracker.on_sample([0.0, 0.0, 15.0]), None);
        assert_eq!(tracker.on_sample([-3.0, 0.0, 9.5]), None);
        assert_eq!(tracker.orientation(), Orientation::Deg0);
    }
}
