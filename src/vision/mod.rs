//! OpenCV-backed capture, marker detection and the diagnostic preview.

pub mod aruco;
pub mod capture;
pub mod convert;
pub mod preview;
