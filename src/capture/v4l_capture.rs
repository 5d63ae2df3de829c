use super::{FrameSource, StreamFormat};
use crate::config::CaptureSettings;
use crate::error::OpenError;
use crate::frame::Frame;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::{Camera, NokhwaError};

/// Webcam source backed by nokhwa.
///
/// The closest format the device supports is accepted; what was actually
/// negotiated is reported through [`FrameSource::format`].
pub struct WebcamSource {
    camera: Camera,
    format: StreamFormat,
    next_sequence: u64,
    open: bool,
}

impl WebcamSource {
    pub fn open(settings: &CaptureSettings) -> Result<Self, OpenError> {
        settings.validate()?;

        tracing::info!(
            "Initializing webcam {} at {}x{} @ {} fps",
            settings.device_index,
            settings.width,
            settings.height,
            settings.fps
        );

        let index = CameraIndex::Index(settings.device_index);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(
                Resolution::new(settings.width, settings.height),
                FrameFormat::MJPEG,
                settings.fps,
            ),
        ));

        let mut camera = Camera::new(index, requested).map_err(|e| open_error(settings, e))?;

        camera.open_stream().map_err(|e| OpenError::DeviceUnavailable {
            index: settings.device_index,
            reason: e.to_string(),
        })?;

        let resolution = camera.resolution();
        let format = StreamFormat {
            width: resolution.width(),
            height: resolution.height(),
            fps: camera.frame_rate(),
        };

        let wanted = (settings.width, settings.height, settings.fps);
        if (format.width, format.height, format.fps) != wanted {
            tracing::info!(
                "Camera negotiated {}x{} @ {} fps instead",
                format.width,
                format.height,
                format.fps
            );
        }
        tracing::info!("Webcam initialized successfully");

        Ok(Self {
            camera,
            format,
            next_sequence: 0,
            open: true,
        })
    }
}

fn open_error(settings: &CaptureSettings, err: NokhwaError) -> OpenError {
    match err {
        NokhwaError::SetPropertyError { .. } | NokhwaError::GetPropertyError { .. } => {
            OpenError::ConfigurationRejected {
                width: settings.width,
                height: settings.height,
                fps: settings.fps,
                reason: err.to_string(),
            }
        }
        other => OpenError::DeviceUnavailable {
            index: settings.device_index,
            reason: other.to_string(),
        },
    }
}

impl FrameSource for WebcamSource {
    fn read_frame(&mut self) -> Option<Frame> {
        if !self.open {
            return None;
        }

        let buffer = match self.camera.frame() {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::debug!("Failed to capture frame: {}", e);
                return None;
            }
        };

        let decoded = match buffer.decode_image::<RgbFormat>() {
            Ok(image) => image,
            Err(e) => {
                tracing::debug!("Failed to decode frame: {}", e);
                return None;
            }
        };

        let frame = Frame::new(decoded, self.next_sequence);
        self.next_sequence += 1;
        Some(frame)
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            if let Err(e) = self.camera.stop_stream() {
                tracing::warn!("Failed to stop camera stream: {}", e);
            }
        }
    }
}

impl Drop for WebcamSource {
    fn drop(&mut self) {
        self.close();
    }
}
