//! GPU compositor capability and a CPU implementation of it

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use super::geometry::{Rect, Size};
use super::plugin::PluginKind;
use crate::error::{PipelineError, Result};
use crate::sensor::Orientation;

/// What the render orchestrator needs from the GPU.
///
/// The camera layer draws into an offscreen framebuffer the size of the
/// viewport; readback reads from that framebuffer, so captures never contain
/// preview effects or UI.
pub trait Compositor: Send {
    /// New surface and viewport geometry. Reallocates the camera framebuffer.
    fn resize(&mut self, surface: Size, viewport: Rect);

    /// Draws one layer with the given plugin into `target`
    fn draw(
        &mut self,
        kind: PluginKind,
        plugin_id: &str,
        target: Rect,
        orientation: Orientation,
        zoom: f32,
    );

    /// Copies the camera framebuffer's `zone` (viewport coordinates) into
    /// `out` as tightly packed RGBA rows
    fn read_pixels(&mut self, zone: Rect, out: &mut [u8]) -> Result<()>;

    /// Swaps the rendered frame to the screen. `false` means the surface is gone.
    fn present(&mut self) -> bool;

    fn release(&mut self);
}

/// Compositor over plain RGBA memory.
///
/// The camera layer renders a moving gradient so consecutive readbacks
/// differ. Useful without a GPU and in tests.
pub struct SoftwareCompositor {
    surface: Size,
    viewport: Rect,
    camera_fb: Vec<u8>,
    screen: Vec<u8>,
    frame: u64,
    fail_present: Arc<AtomicBool>,
}

impl SoftwareCompositor {
    pub fn new() -> Self {
        Self {
            surface: Size::default(),
            viewport: Rect::default(),
            camera_fb: Vec::new(),
            screen: Vec::new(),
            frame: 0,
            fail_present: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that makes the next `present` fail, as if the surface was lost
    pub fn present_failure(&self) -> Arc<AtomicBool> {
        self.fail_present.clone()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frame
    }

    fn fill_camera(&mut self, orientation: Orientation, zoom: f32) {
        let width = self.viewport.width as usize;
        let height = self.viewport.height as usize;
        if width == 0 || height == 0 {
            return;
        }

        let shift = (self.frame as usize + orientation.degrees() as usize) & 0xff;
        let scale = zoom.max(1.0);
        for row in 0..height {
            let v = ((row as f32 / scale) as usize * 255 / height) as u8;
            let line = &mut self.camera_fb[row * width * 4..(row + 1) * width * 4];
            for (col, px) in line.chunks_exact_mut(4).enumerate() {
                let u = ((col as f32 / scale) as usize * 255 / width) as u8;
                px[0] = u;
                px[1] = v;
                px[2] = (shift as u8).wrapping_add(u / 2);
                px[3] = 255;
            }
        }
    }

    fn blit_preview(&mut self, target: Rect) {
        let sw = self.surface.width as i64;
        let sh = self.surface.height as i64;
        let vw = self.viewport.width as usize;

        for row in 0..target.height as i64 {
            let sy = target.y as i64 + row;
            if sy < 0 || sy >= sh {
                continue;
            }
            let cols = (target.width as i64).min(sw - target.x as i64).max(0) as usize;
            if cols == 0 {
                continue;
            }
            let src = row as usize * vw * 4;
            let dst = (sy * sw + target.x as i64) as usize * 4;
            self.screen[dst..dst + cols * 4]
                .copy_from_slice(&self.camera_fb[src..src + cols * 4]);
        }
    }

    fn outline(&mut self, target: Rect) {
        let sw = self.surface.width as i64;
        let sh = self.surface.height as i64;
        let mut mark = |x: i64, y: i64| {
            if x >= 0 && y >= 0 && x < sw && y < sh {
                let at = (y * sw + x) as usize * 4;
                self.screen[at..at + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        };

        let (x0, y0) = (target.x as i64, target.y as i64);
        let (x1, y1) = (x0 + target.width as i64 - 1, y0 + target.height as i64 - 1);
        for x in x0..=x1 {
            mark(x, y0);
            mark(x, y1);
        }
        for y in y0..=y1 {
            mark(x0, y);
            mark(x1, y);
        }
    }
}

impl Default for SoftwareCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor for SoftwareCompositor {
    fn resize(&mut self, surface: Size, viewport: Rect) {
        info!(
            "Software compositor surface {}x{}, viewport {:?}",
            surface.width, surface.height, viewport
        );
        self.surface = surface;
        self.viewport = viewport;
        self.camera_fb = vec![0; viewport.rgba_len()];
        self.screen = vec![0; surface.area() as usize * 4];
    }

    fn draw(
        &mut self,
        kind: PluginKind,
        _plugin_id: &str,
        target: Rect,
        orientation: Orientation,
        zoom: f32,
    ) {
        if self.screen.is_empty() || target.is_empty() {
            return;
        }
        match kind {
            PluginKind::Camera => self.fill_camera(orientation, zoom),
            PluginKind::Preview => self.blit_preview(target),
            PluginKind::Ui => self.outline(target),
        }
    }

    fn read_pixels(&mut self, zone: Rect, out: &mut [u8]) -> Result<()> {
        let fits = zone.x >= 0
            && zone.y >= 0
            && zone.x as u32 + zone.width <= self.viewport.width
            && zone.y as u32 + zone.height <= self.viewport.height;
        if !fits || out.len() < zone.rgba_len() {
            return Err(PipelineError::Readback {
                width: zone.width,
                height: zone.height,
                reason: format!(
                    "zone outside {}x{} framebuffer",
                    self.viewport.width, self.viewport.height
                ),
            });
        }

        let vw = self.viewport.width as usize;
        let row_len = zone.width as usize * 4;
        for row in 0..zone.height as usize {
            let src = ((zone.y as usize + row) * vw + zone.x as usize) * 4;
            out[row * row_len..(row + 1) * row_len]
                .copy_from_slice(&self.camera_fb[src..src + row_len]);
        }
        Ok(())
    }

    fn present(&mut self) -> bool {
        if self.fail_present.load(Ordering::Relaxed) {
            return false;
        }
        self.frame += 1;
        true
    }

    fn release(&mut self) {
        debug!("Releasing software compositor after {} frames", self.frame);
        self.camera_fb = Vec::new();
        self.screen = Vec::new();
    }
}
