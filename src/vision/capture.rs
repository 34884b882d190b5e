use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureAPIs},
};

use crate::{
    config::CameraConfig,
    frame::{CameraFrame, FrameAcquisitionError, FrameSlot, FrameSource},
    vision::convert::bgr_to_frame,
};

/// Synchronous capture: every poll reads one frame from the device.
pub struct OpenCvCamera {
    capture: VideoCapture,
    opened_at: Instant,
    next_index: u64,
}

impl OpenCvCamera {
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let mut capture = VideoCapture::new(config.index, VideoCaptureAPIs::CAP_ANY as i32)
            .context("Failed to open camera")?;

        if !capture.is_opened()? {
            anyhow::bail!("Camera {} is not available", config.index);
        }

        if let Some(w) = config.width {
            capture.set(videoio::CAP_PROP_FRAME_WIDTH, w as f64)?;
        }
        if let Some(h) = config.height {
            capture.set(videoio::CAP_PROP_FRAME_HEIGHT, h as f64)?;
        }
        if let Some(f) = config.fps {
            capture.set(videoio::CAP_PROP_FPS, f as f64)?;
        }
        capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;

        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        let fps = capture.get(videoio::CAP_PROP_FPS)?;
        log::info!("Opened camera {} at {}x{}, {} fps", config.index, width, height, fps);

        Ok(Self {
            capture,
            opened_at: Instant::now(),
            next_index: 0,
        })
    }

    /// Reads one BGR frame.
    pub fn read_mat(&mut self) -> Result<Mat, FrameAcquisitionError> {
        let mut frame = Mat::default();
        let ok = self
            .capture
            .read(&mut frame)
            .map_err(|e| FrameAcquisitionError::Device(e.to_string()))?;

        if !ok || frame.empty() {
            return Err(FrameAcquisitionError::Empty);
        }

        Ok(frame)
    }

    pub fn read_frame(&mut self) -> Result<CameraFrame, FrameAcquisitionError> {
        let mat = self.read_mat()?;
        let timestamp = self.opened_at.elapsed();
        let frame = bgr_to_frame(&mat, self.next_index, timestamp)
            .map_err(|e| FrameAcquisitionError::Device(format!("{:#}", e)))?;
        self.next_index += 1;
        Ok(frame)
    }
}

impl FrameSource for OpenCvCamera {
    fn poll_frame(&mut self) -> Result<Option<CameraFrame>, FrameAcquisitionError> {
        self.read_frame().map(Some)
    }
}

/// Captures on a worker thread. The render thread only ever sees the newest
/// frame; frames it did not get to are dropped.
pub struct ThreadedCamera {
    slot: Arc<FrameSlot<CameraFrame>>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ThreadedCamera {
    pub fn start(config: &CameraConfig) -> Result<Self> {
        let mut camera = OpenCvCamera::open(config)?;

        let slot = Arc::new(FrameSlot::new());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let slot = slot.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("camera capture".to_string())
                .spawn(move || {
                    let mut failing = false;
                    while !stop.load(Ordering::Relaxed) {
                        match camera.read_frame() {
                            Ok(frame) => {
                                failing = false;
                                slot.publish(frame);
                            }
                            Err(e) => {
                                if !failing {
                                    log::warn!("Camera read failed: {}", e);
                                    failing = true;
                                }
                                thread::sleep(Duration::from_millis(5));
                            }
                        }
                    }
                    log::debug!(
                        "Capture thread stopped after {} frames ({} dropped)",
                        slot.published(),
                        slot.dropped()
                    );
                })
                .context("Failed to start capture thread")?
        };

        Ok(Self {
            slot,
            stop,
            handle: Some(handle),
        })
    }
}

impl FrameSource for ThreadedCamera {
    fn poll_frame(&mut self) -> Result<Option<CameraFrame>, FrameAcquisitionError> {
        if let Some(frame) = self.slot.take() {
            return Ok(Some(frame));
        }

        match &self.handle {
            Some(handle) if !handle.is_finished() => Ok(None),
            _ => Err(FrameAcquisitionError::Disconnected),
        }
    }
}

impl Drop for ThreadedCamera {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Capture thread panicked");
            }
        }
    }
}
