pub mod builder;
pub mod frame;
pub mod pool;
pub mod record;

pub use builder::CaptureSnapshotBuilder;
pub use frame::FrameMetadata;
pub use pool::{BufferAllocator, BufferPool};
pub use record::{Capture, Readiness, ValidationState};
