//! glimmer-hw: hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access and the grayscale [`Frame`] type the
//! classifier consumes.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use frame::Frame;
