//! Viewport and capture-zone rectangles

use serde::{Deserialize, Serialize};

use crate::sensor::{Orientation, OrientationMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Integer pixel rectangle, origin at the bottom-left like the GPU framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Bytes needed for an RGBA readback of this rectangle
    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Viewport showing the camera preview on a surface.
///
/// The preview keeps its aspect ratio and fills the surface width; the
/// leftover (or overflow) height is split evenly above and below. The camera
/// delivers sensor-oriented sizes, so a landscape preview size is rotated
/// to fit the portrait-locked surface.
pub fn viewport(surface: Size, preview: Size) -> Rect {
    if surface.is_empty() || preview.is_empty() {
        return Rect::default();
    }

    let (pw, ph) = if preview.width > preview.height {
        (preview.height, preview.width)
    } else {
        (preview.width, preview.height)
    };

    let height = (surface.width as u64 * ph as u64 / pw as u64) as u32;
    let y = (surface.height as i64 - height as i64) / 2;
    Rect::new(0, y as i32, surface.width, height)
}

/// Capture zone inside `viewport`, in viewport-relative coordinates.
///
/// Full viewport width; the height follows `ratio` (height/width in portrait,
/// width/height in landscape) and is clamped to the viewport. Always
/// vertically centered.
pub fn capture_zone(viewport: Rect, orientation: Orientation, ratio: f32) -> Rect {
    if viewport.is_empty() || ratio <= 0.0 {
        return Rect::default();
    }

    let wanted = match orientation.mode() {
        OrientationMode::Portrait => viewport.width as f32 * ratio,
        OrientationMode::Landscape => viewport.width as f32 / ratio,
    };
    let height = (wanted as u32).min(viewport.height);
    let y = (viewport.height - height) / 2;
    Rect::new(0, y as i32, viewport.width, height)
}
