pub mod compositor;
pub mod geometry;
pub mod plugin;

pub use compositor::{Compositor, SoftwareCompositor};
pub use geometry::{Rect, Size};
pub use plugin::{PluginKind, PluginRegistry, Zoom, ZoomState};
