use super::{FrameSource, StreamFormat};
use crate::config::CaptureSettings;
use crate::error::OpenError;
use crate::frame::Frame;
use image::{Rgb, RgbImage};
use std::time::{Duration, Instant};

/// Synthetic source producing a scrolling gradient at the requested rate.
///
/// Used when no camera is attached, and for exercising the pipeline
/// end to end.
pub struct TestPatternSource {
    format: StreamFormat,
    frame_duration: Duration,
    last_frame: Option<Instant>,
    next_sequence: u64,
    open: bool,
}

impl TestPatternSource {
    pub fn open(settings: &CaptureSettings) -> Result<Self, OpenError> {
        settings.validate()?;
        tracing::info!(
            "Using test pattern at {}x{} @ {} fps",
            settings.width,
            settings.height,
            settings.fps
        );

        Ok(Self {
            format: StreamFormat {
                width: settings.width,
                height: settings.height,
                fps: settings.fps,
            },
            frame_duration: Duration::from_secs_f32(1.0 / settings.fps as f32),
            last_frame: None,
            next_sequence: 0,
            open: true,
        })
    }

    fn render(&self) -> RgbImage {
        let StreamFormat { width, height, .. } = self.format;
        let (width_nz, height_nz) = (width.max(1), height.max(1));
        // Scrolls four columns per frame and wraps at the frame edge
        let shift = (self.next_sequence.wrapping_mul(4) % u64::from(width_nz)) as u32;
        RgbImage::from_fn(width, height, |x, y| {
            let r = ((x + shift) % width_nz * 255 / width_nz) as u8;
            let g = (y * 255 / height_nz) as u8;
            Rgb([r, g, 96])
        })
    }
}

impl FrameSource for TestPatternSource {
    fn read_frame(&mut self) -> Option<Frame> {
        if !self.open {
            return None;
        }

        // Frame rate limiting
        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < self.frame_duration {
                std::thread::sleep(self.frame_duration - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());

        let frame = Frame::new(self.render(), self.next_sequence);
        self.next_sequence += 1;
        Some(frame)
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn close(&mut self) {
        self.open = false;
    }
}
