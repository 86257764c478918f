//! Coarse 4-way device orientation

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrientationMode {
    Portrait,
    Landscape,
}

/// Device rotation in degrees, portrait-upright is 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    pub fn degrees(self) -> u16 {
        match self {
            Orientation::Deg0 => 0,
            Orientation::Deg90 => 90,
            Orientation::Deg180 => 180,
            Orientation::Deg270 => 270,
        }
    }

    /// Unknown values fall back to upright portrait
    pub fn from_degrees(degrees: u16) -> Self {
        match degrees {
            90 => Orientation::Deg90,
            180 => Orientation::Deg180,
            270 => Orientation::Deg270,
            _ => Orientation::Deg0,
        }
    }

    pub fn mode(self) -> OrientationMode {
        match self {
            Orientation::Deg0 | Orientation::Deg180 => OrientationMode::Portrait,
            Orientation::Deg90 | Orientation::Deg270 => OrientationMode::Landscape,
        }
    }

    /// Orientation from the gravity vector's dominant in-plane axis
    pub fn from_gravity(x: f32, y: f32) -> Self {
        if y.abs() > x.abs() {
            if y > 0.0 {
                Orientation::Deg0
            } else {
                Orientation::Deg180
            }
        } else if x > 0.0 {
            Orientation::Deg90
        } else {
            Orientation::Deg270
        }
    }
}

/// Orientation with hysteresis on the device lying flat.
///
/// When the z component of gravity rises above `enter` the device is taken
/// as lying flat and x/y no longer say anything reliable, so orientation is
/// frozen. It thaws only once |z| drops below `exit`.
#[derive(Debug, Clone)]
pub struct OrientationFilter {
    current: Orientation,
    flat: bool,
    enter: f32,
    exit: f32,
}

impl OrientationFilter {
    pub fn new(enter: f32, exit: f32) -> Self {
        Self {
            current: Orientation::Deg0,
            flat: false,
            enter,
            exit,
        }
    }

    pub fn current(&self) -> Orientation {
        self.current
    }

    pub fn is_flat(&self) -> bool {
        self.flat
    }

    /// Feeds one gravity sample, returns the possibly unchanged orientation
    pub fn update(&mut self, gravity: [f32; 3]) -> Orientation {
        let [x, y, z] = gravity;
        let abs_z = z.abs();

        if self.flat && abs_z < self.exit {
            self.flat = false;
        } else if !self.flat && abs_z > self.enter {
            self.flat = true;
        }

        if !self.flat {
            self.current = Orientation::from_gravity(x, y);
        }
        self.current
    }
}
