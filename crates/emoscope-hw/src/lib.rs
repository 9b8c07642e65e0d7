//! emoscope-hw: camera capture and frame handling.
//!
//! Provides V4L2-based camera access, grayscale conversion, and the
//! [`FrameSource`] seam the capture loop pulls from.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, LiveCapture, PixelFormat};
pub use frame::{Frame, FrameError};
