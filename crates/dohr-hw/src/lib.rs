//! dohr-hw — Hardware abstraction for the doorbell camera.
//!
//! Provides V4L2-based color capture; frames come out as RGB, ready for
//! the descriptor extractor.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError};
pub use frame::Frame;
