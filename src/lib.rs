pub mod assets;
pub mod calibration;
pub mod compositor;
pub mod config;
pub mod context;
pub mod frame;
pub mod marker;
pub mod model;
pub mod pipeline;
pub mod pose;
pub mod registry;
pub mod rendering;
pub mod sequence;
#[cfg(feature = "opencv")]
pub mod vision;
pub mod window;
