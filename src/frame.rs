use chrono::{DateTime, Utc};
use image::RgbImage;
use std::time::Instant;

/// A captured camera frame.
///
/// The pixel buffer is owned. Anything that outlives the capture loop
/// iteration (an inference dispatch, a snapshot request) takes its own copy.
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB pixel data
    pub image: RgbImage,
    /// Per-device capture counter, starting at 0 for each open
    pub sequence: u64,
    /// Monotonic capture instant, used for throttling
    pub captured_at: Instant,
    /// Wall-clock capture time, used for persisted records
    pub wall_clock: DateTime<Utc>,
}

impl Frame {
    /// Wrap a freshly captured image, stamping it with the current time.
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self::with_instant(image, sequence, Instant::now())
    }

    /// Wrap an image with an explicit capture instant.
    pub fn with_instant(image: RgbImage, sequence: u64, captured_at: Instant) -> Self {
        Self {
            image,
            sequence,
            captured_at,
            wall_clock: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
