//! MediaCapture - Camera Feed and Scoped Sessions
//!
//! ## Responsibilities
//!
//! - Abstract the continuous camera feed (`FrameSource`)
//! - Gate camera open on a current location fix
//! - Release the camera on every exit path (`CameraSession` drop)

use crate::error::{Error, Result};
use crate::location_tracker::LocationTracker;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Fallback frame size when the feed does not report one
pub const DEFAULT_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;

/// One still frame (JPEG)
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn jpeg(data: Vec<u8>, width: Option<u32>, height: Option<u32>) -> Self {
        Self {
            data,
            width: width.filter(|w| *w > 0).unwrap_or(DEFAULT_FRAME_WIDTH),
            height: height.filter(|h| *h > 0).unwrap_or(DEFAULT_FRAME_HEIGHT),
        }
    }
}

/// Continuous camera feed
pub trait FrameSource: Send + Sync + 'static {
    /// Acquire the device
    fn start(&self) -> impl Future<Output = Result<()>> + Send;

    /// Release the device; must be safe to call more than once
    fn stop(&self);

    fn is_active(&self) -> bool;

    /// Still frame from the running feed
    fn grab(&self) -> impl Future<Output = Result<Frame>> + Send;
}

/// Open camera, released on drop
pub struct CameraSession<F: FrameSource> {
    source: Arc<F>,
}

impl<F: FrameSource> CameraSession<F> {
    /// Open the camera; waits up to the location timeout for a fix
    pub async fn open(source: Arc<F>, location: &LocationTracker) -> Result<Self> {
        if let Err(e) = location.wait_for_fix().await {
            tracing::warn!(error = %e, "Camera open refused without location");
            return Err(Error::LocationUnavailable(
                "Location required for camera usage".to_string(),
            ));
        }

        source.start().await?;
        tracing::debug!("Camera session opened");
        Ok(Self { source })
    }

    pub async fn grab(&self) -> Result<Frame> {
        self.source.grab().await
    }

    pub fn is_active(&self) -> bool {
        self.source.is_active()
    }

    /// Explicit close
    pub fn close(self) {}
}

impl<F: FrameSource> Drop for CameraSession<F> {
    fn drop(&mut self) {
        self.source.stop();
        tracing::debug!("Camera session released");
    }
}

/// Feed backed by one uploaded frame
pub struct StillFrameSource {
    frame: Mutex<Option<Frame>>,
    active: AtomicBool,
}

impl StillFrameSource {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame: Mutex::new(Some(frame)),
            active: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    fn empty() -> Self {
        Self {
            frame: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }
}

impl FrameSource for StillFrameSource {
    async fn start(&self) -> Result<()> {
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn grab(&self) -> Result<Frame> {
        if !self.is_active() {
            return Err(Error::CameraUnavailable("No camera feed available".to_string()));
        }
        let frame = self.frame.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match frame {
            Some(frame) if !frame.data.is_empty() => Ok(frame),
            _ => Err(Error::CameraUnavailable("Camera not ready".to_string())),
        }
    }
}
