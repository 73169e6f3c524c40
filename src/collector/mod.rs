//! Frame collection and expression detection.
//!
//! Both the camera and the detection model are external collaborators; this
//! module defines the seams they plug into and the backends shipped with the
//! crate.

pub mod camera;
pub mod detector;
pub mod types;

// Re-export commonly used types
pub use camera::{encode_jpeg, FrameSource, StillImageCamera, SyntheticCamera};
pub use detector::{DetectorEnv, ExpressionDetector, NoopDetector};
pub use types::{Emotion, ExpressionRecord, Frame};
