#[cfg(feature = "v4l2-output")]
mod loopback;

#[cfg(feature = "v4l2-output")]
pub use loopback::V4L2Output;

use anyhow::Result;
use image::RgbImage;

/// Trait for display destinations
pub trait OutputSink: Send {
    /// Write a frame to the output
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Discards frames. Used when running headless.
#[derive(Debug, Default)]
pub struct NullOutput {
    frames: u64,
}

impl NullOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl OutputSink for NullOutput {
    fn write_frame(&mut self, _frame: &RgbImage) -> Result<()> {
        self.frames += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "none (headless)".to_string()
    }
}
