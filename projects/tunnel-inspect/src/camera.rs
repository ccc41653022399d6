// Process-wide camera handle: opened on first capture, kept open afterwards.

use crate::error::ServiceError;
use anyhow::{anyhow, Result};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{VideoCapture, CAP_ANY},
};
use std::sync::Mutex;

/// A device that yields one frame per call, `None` when no frame is available.
pub trait FrameGrabber: Send {
    fn grab_frame(&mut self) -> Result<Option<Mat>>;
}

impl FrameGrabber for VideoCapture {
    fn grab_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        if !self.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }
}

type Opener = Box<dyn Fn() -> Result<Box<dyn FrameGrabber>> + Send + Sync>;

pub struct CameraManager {
    opener: Opener,
    device: Mutex<Option<Box<dyn FrameGrabber>>>,
}

impl CameraManager {
    /// Camera backed by an OpenCV capture device.
    pub fn opencv(index: i32) -> Self {
        Self::with_opener(move || {
            let capture = VideoCapture::new(index, CAP_ANY)?;
            if !capture.is_opened()? {
                return Err(anyhow!("Could not open camera {}", index));
            }
            tracing::info!("Opened camera {}", index);
            Ok(Box::new(capture) as Box<dyn FrameGrabber>)
        })
    }

    pub fn with_opener<F>(opener: F) -> Self
    where
        F: Fn() -> Result<Box<dyn FrameGrabber>> + Send + Sync + 'static,
    {
        Self {
            opener: Box::new(opener),
            device: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.device.lock().map(|d| d.is_some()).unwrap_or(false)
    }

    /// Reads one frame and runs `process` on it while still holding the camera.
    ///
    /// Concurrent callers are serialized. The device is opened on first use;
    /// a failed open is retried by the next call, a failed read keeps the device.
    pub fn capture_with<T, F>(&self, process: F) -> Result<T>
    where
        F: FnOnce(&Mat) -> Result<T>,
    {
        let mut device = self
            .device
            .lock()
            .map_err(|_| anyhow!("Camera mutex poisoned"))?;

        if device.is_none() {
            let opened = (self.opener)()
                .map_err(|e| ServiceError::CameraUnavailable(format!("{:#}", e)))?;
            *device = Some(opened);
        }

        let grabber = device
            .as_mut()
            .ok_or_else(|| anyhow!("Camera handle missing after open"))?;
        let frame = grabber.grab_frame()?.ok_or(ServiceError::CaptureFailed)?;

        process(&frame)
    }
}
