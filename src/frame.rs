use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use image::RgbaImage;

/// A captured frame. Rows are in capture order, top row first.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub image: RgbaImage,
    /// Increases by one for every frame the device delivers.
    pub index: u64,
    /// Time since the capture device was opened.
    pub timestamp: Duration,
}

impl CameraFrame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FrameAcquisitionError {
    #[error("capture device returned an empty frame")]
    Empty,
    #[error("capture device failed: {0}")]
    Device(String),
    #[error("capture worker has stopped")]
    Disconnected,
}

/// Where the frame loop gets its frames from.
///
/// `poll_frame` must not block for longer than a device read; `Ok(None)` means
/// no new frame is ready yet.
pub trait FrameSource {
    fn poll_frame(&mut self) -> Result<Option<CameraFrame>, FrameAcquisitionError>;
}

/// Single-slot handoff between a capture thread and the render thread.
///
/// Publishing overwrites whatever has not been taken yet, so the consumer only
/// ever sees the newest frame and latency cannot build up.
pub struct FrameSlot<T> {
    latest: Mutex<Option<T>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl<T> FrameSlot<T> {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(None),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Returns true if an untaken value was replaced.
    pub fn publish(&self, value: T) -> bool {
        let replaced = self
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(value)
            .is_some();

        self.published.fetch_add(1, Ordering::Release);
        if replaced {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        replaced
    }

    pub fn take(&self) -> Option<T> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> Default for FrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
