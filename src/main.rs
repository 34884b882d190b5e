use anyhow::{Context, Result};

use markerlay::{
    config::AppConfig,
    context::ArContext,
    frame::FrameSource,
    pipeline::FrameObserver,
    vision::{
        aruco::ArucoMarkerDetector,
        capture::{OpenCvCamera, ThreadedCamera},
        preview::OpenCvPreview,
    },
    window::{self, FrameInputs},
};

const DEFAULT_CONFIG: &str = "markerlay.toml";

fn main() -> Result<()> {
    pretty_env_logger::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = AppConfig::load_or_default(&config_path)?;

    let context = ArContext::load(&config)?;

    let detector = ArucoMarkerDetector::new(&context.intrinsics, &config.detector)?;

    let source: Box<dyn FrameSource> = if config.camera.threaded {
        Box::new(ThreadedCamera::start(&config.camera).context("Failed to start camera")?)
    } else {
        Box::new(OpenCvCamera::open(&config.camera).context("Failed to open camera")?)
    };

    let observer: Option<Box<dyn FrameObserver>> = if config.preview.enabled {
        Some(Box::new(OpenCvPreview::new(
            config.preview.window_name.clone(),
            &context.intrinsics,
            config.detector.marker_length,
        )?))
    } else {
        None
    };

    window::run(
        config.window.clone(),
        config.projection,
        context,
        FrameInputs {
            source,
            detector: Box::new(detector),
            observer,
        },
    )
}
