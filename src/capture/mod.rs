mod test_pattern;
#[cfg(feature = "camera")]
mod v4l_capture;

pub use test_pattern::TestPatternSource;
#[cfg(feature = "camera")]
pub use v4l_capture::WebcamSource;

use crate::config::CaptureSettings;
use crate::error::{CaptureError, OpenError};
use crate::frame::Frame;
use serde::Serialize;

/// Consecutive failed reads after which the device counts as lost.
pub const MAX_CONSECUTIVE_READ_FAILURES: u32 = 3;

/// Format the device actually delivers after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Trait for camera capture sources
pub trait FrameSource {
    /// Capture a single frame
    ///
    /// Returns `None` on a transient read failure. Callers decide when
    /// repeated failures mean the device is gone.
    fn read_frame(&mut self) -> Option<Frame>;

    /// Get the negotiated resolution and frame rate
    fn format(&self) -> StreamFormat;

    /// Release the device
    ///
    /// Must be safe to call any number of times; only the first call
    /// releases anything.
    fn close(&mut self);
}

/// Opens a [`FrameSource`] for a session run.
///
/// Sessions open the device at the start of every run and release it at the
/// end, so the opener is kept and called again on restart.
pub trait DeviceOpener: Send {
    fn open(&mut self, settings: &CaptureSettings) -> Result<Box<dyn FrameSource>, OpenError>;
}

impl<F> DeviceOpener for F
where
    F: FnMut(&CaptureSettings) -> Result<Box<dyn FrameSource>, OpenError> + Send,
{
    fn open(&mut self, settings: &CaptureSettings) -> Result<Box<dyn FrameSource>, OpenError> {
        self(settings)
    }
}

/// Owns an open source and guarantees it is released on every exit path,
/// including unwinding.
pub struct DeviceGuard {
    source: Box<dyn FrameSource>,
    closed: bool,
}

impl DeviceGuard {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            closed: false,
        }
    }

    pub fn read_frame(&mut self) -> Option<Frame> {
        if self.closed {
            return None;
        }
        self.source.read_frame()
    }

    pub fn format(&self) -> StreamFormat {
        self.source.format()
    }

    /// Read until a frame arrives or the failure threshold is reached.
    pub fn read_frame_tolerant(&mut self) -> Result<Frame, CaptureError> {
        for attempt in 1..=MAX_CONSECUTIVE_READ_FAILURES {
            if let Some(frame) = self.read_frame() {
                return Ok(frame);
            }
            tracing::debug!("Frame read failed ({}/{})", attempt, MAX_CONSECUTIVE_READ_FAILURES);
        }
        Err(CaptureError::DeviceLost {
            failures: MAX_CONSECUTIVE_READ_FAILURES,
        })
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.source.close();
            tracing::info!("Camera released");
        }
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        self.close();
    }
}
