use super::OutputSink;
use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// Display sink writing YUYV frames to a v4l2loopback device, so any
/// video viewer can show the annotated feed.
pub struct V4L2Output {
    _device: Device,
    file: File,
    path: PathBuf,
    width: u32,
    height: u32,
    packed: Vec<u8>,
}

impl V4L2Output {
    /// Open `device_path` and fix its format to YUYV at `width`x`height`.
    pub fn new(device_path: impl AsRef<Path>, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!("Opening loopback output {} at {}x{}", path.display(), width, height);

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open loopback device {}", path.display()))?;
        let requested = Format::new(width, height, FourCC::new(b"YUYV"));
        let format = Output::set_format(&device, &requested)
            .with_context(|| format!("Failed to set output format on {}", path.display()))?;
        if (format.width, format.height) != (width, height) {
            anyhow::bail!(
                "loopback device accepted {}x{} instead of {}x{}",
                format.width,
                format.height,
                width,
                height
            );
        }

        // Frames are written straight to the device node
        let file = File::options().write(true).open(path).with_context(|| {
            format!("Failed to open loopback device {} for writing", path.display())
        })?;

        tracing::info!("Loopback output ready");

        Ok(Self {
            _device: device,
            file,
            path: path.to_path_buf(),
            width,
            height,
            packed: Vec::with_capacity((width * height * 2) as usize),
        })
    }
}

/// Pack an RGB image as YUYV 4:2:2 into `out`, replacing its contents.
///
/// Each horizontal pixel pair shares the average of its chroma. An odd last
/// column is paired with itself.
fn pack_yuyv(image: &RgbImage, out: &mut Vec<u8>) {
    let (width, height) = image.dimensions();
    out.clear();
    out.reserve((width.div_ceil(2) * 2 * height * 2) as usize);

    for row in 0..height {
        let mut col = 0;
        while col < width {
            let left = *image.get_pixel(col, row);
            let right = if col + 1 < width {
                *image.get_pixel(col + 1, row)
            } else {
                left
            };

            let (y0, u0, v0) = to_yuv(left);
            let (y1, u1, v1) = to_yuv(right);
            out.extend_from_slice(&[y0, (u0 + u1) / 2.0, y1, (v0 + v1) / 2.0].map(to_byte));
            col += 2;
        }
    }
}

/// BT.601 luma and offset chroma, unclamped.
fn to_yuv(Rgb([r, g, b]): Rgb<u8>) -> (f32, f32, f32) {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = 128.0 - 0.147 * r - 0.289 * g + 0.436 * b;
    let v = 128.0 + 0.615 * r - 0.515 * g - 0.100 * b;
    (y, u, v)
}

fn to_byte(value: f32) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() == (self.width, self.height) {
            pack_yuyv(frame, &mut self.packed);
        } else {
            let scaled = imageops::resize(frame, self.width, self.height, FilterType::Triangle);
            pack_yuyv(&scaled, &mut self.packed);
        }

        self.file
            .write_all(&self.packed)
            .with_context(|| format!("Failed to write frame to {}", self.path.display()))
    }

    fn describe(&self) -> String {
        format!("{} ({}x{} YUYV)", self.path.display(), self.width, self.height)
    }
}
