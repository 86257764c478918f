pub mod motion;
pub mod orientation;

pub use motion::{MotionOrientationTracker, MotionSample, MotionSlot};
pub use orientation::{Orientation, OrientationMode};
