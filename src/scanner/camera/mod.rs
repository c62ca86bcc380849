pub mod error;
pub mod source;
pub mod supervisor;

pub use error::CameraError;
pub use source::{FrameSource, MockFrameSource, RawGraySource};
pub use supervisor::{CameraHealth, CameraState, CameraSupervisor};
