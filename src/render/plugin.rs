//! Plugin selection and camera zoom

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Compositing layer a plugin draws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginKind {
    /// Camera texture into the offscreen framebuffer
    Camera,
    /// Visual effect over the camera framebuffer
    Preview,
    /// Overlay, including the capture zone frame
    Ui,
}

/// Known plugin ids per kind and the active one of each
#[derive(Debug, Clone)]
pub struct PluginRegistry {
    camera: Vec<String>,
    preview: Vec<String>,
    ui: Vec<String>,
    active: [usize; 3],
}

fn slot(kind: PluginKind) -> usize {
    match kind {
        PluginKind::Camera => 0,
        PluginKind::Preview => 1,
        PluginKind::Ui => 2,
    }
}

impl PluginRegistry {
    /// The first id of each list is active initially. Empty lists get a
    /// `default` entry.
    pub fn new(camera: Vec<String>, preview: Vec<String>, ui: Vec<String>) -> Self {
        let or_default = |ids: Vec<String>| {
            if ids.is_empty() {
                vec!["default".to_string()]
            } else {
                ids
            }
        };
        Self {
            camera: or_default(camera),
            preview: or_default(preview),
            ui: or_default(ui),
            active: [0; 3],
        }
    }

    fn ids(&self, kind: PluginKind) -> &[String] {
        match kind {
            PluginKind::Camera => &self.camera,
            PluginKind::Preview => &self.preview,
            PluginKind::Ui => &self.ui,
        }
    }

    pub fn active(&self, kind: PluginKind) -> &str {
        &self.ids(kind)[self.active[slot(kind)]]
    }

    /// Switches the active plugin. Unknown ids are ignored.
    pub fn select(&mut self, kind: PluginKind, id: &str) -> bool {
        match self.ids(kind).iter().position(|known| known == id) {
            Some(index) => {
                self.active[slot(kind)] = index;
                true
            }
            None => {
                warn!("Unknown {:?} plugin '{}', keeping '{}'", kind, id, self.active(kind));
                false
            }
        }
    }
}

/// Zoom request from the input side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ZoomState {
    #[default]
    None,
    In,
    Out,
    Reset,
}

/// Camera zoom factor, stepped once per rendered frame while a zoom
/// request is held
#[derive(Debug, Clone)]
pub struct Zoom {
    state: ZoomState,
    factor: f32,
    max: f32,
    velocity: f32,
}

impl Zoom {
    pub fn new(max: f32, velocity: f32) -> Self {
        Self {
            state: ZoomState::None,
            factor: 1.0,
            max: max.max(1.0),
            velocity: velocity.max(1.0),
        }
    }

    pub fn set_state(&mut self, state: ZoomState) {
        self.state = state;
    }

    pub fn state(&self) -> ZoomState {
        self.state
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    pub fn step(&mut self) -> f32 {
        match self.state {
            ZoomState::None => {}
            ZoomState::Reset => {
                self.factor = 1.0;
                self.state = ZoomState::None;
            }
            ZoomState::In => {
                self.factor = (self.factor + self.factor / self.velocity).min(self.max);
            }
            ZoomState::Out => {
                self.factor = (self.factor - self.factor / self.velocity).max(1.0);
            }
        }
        self.factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PluginRegistry {
        PluginRegistry::new(
            vec!["camera_default".into()],
            vec!["preview_default".into(), "preview_toon".into()],
            vec![],
        )
    }

    #[test]
    fn test_first_plugin_is_active() {
        let r = registry();
        assert_eq!(r.active(PluginKind::Camera), "camera_default");
        assert_eq!(r.active(PluginKind::Preview), "preview_default");
        assert_eq!(r.active(PluginKind::Ui), "default");
    }

    #[test]
    fn test_select_known_and_unknown() {
        let mut r = registry();
        assert!(r.select(PluginKind::Preview, "preview_toon"));
        assert_eq!(r.active(PluginKind::Preview), "preview_toon");

        assert!(!r.select(PluginKind::Preview, "preview_sepia"));
        assert_eq!(r.active(PluginKind::Preview), "preview_toon");
    }

    #[test]
    fn test_zoom_in_is_capped() {
        let mut zoom = Zoom::new(2.0, 10.0);
        zoom.set_state(ZoomState::In);
        assert!((zoom.step() - 1.1).abs() < 1e-6);
        for _ in 0..100 {
            zoom.step();
        }
        assert_eq!(zoom.factor(), 2.0);
    }

    #[test]
    fn test_zoom_out_floors_at_one() {
        let mut zoom = Zoom::new(10.0, 10.0);
        zoom.set_state(ZoomState::In);
        zoom.step();
        zoom.set_state(ZoomState::Out);
        for _ in 0..10 {
            zoom.step();
        }
        assert_eq!(zoom.factor(), 1.0);
    }

    #[test]
    fn test_zoom_none_holds_and_reset_clears() {
        let mut zoom = Zoom::new(10.0, 10.0);
        zoom.set_state(ZoomState::In);
        zoom.step();
        zoom.set_state(ZoomState::None);
        let held = zoom.step();
        assert_eq!(zoom.step(), held);

        zoom.set_state(ZoomState::Reset);
        assert_eq!(zoom.step(), 1.0);
        assert_eq!(zoom.state(), ZoomState::None);
    }
}
