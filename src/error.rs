use crate::snapshot::SnapshotRecord;
use std::io;
use thiserror::Error;

/// Failure to acquire a camera device. Fatal at startup, never retried here.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("camera device {index} is unavailable: {reason}")]
    DeviceUnavailable { index: u32, reason: String },

    #[error("camera rejected {width}x{height} @ {fps} fps: {reason}")]
    ConfigurationRejected {
        width: u32,
        height: u32,
        fps: u32,
        reason: String,
    },
}

/// Errors that end a capture session.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Open(#[from] OpenError),

    /// Too many consecutive frame reads failed; the device has been released.
    #[error("camera lost after {failures} consecutive failed reads")]
    DeviceLost { failures: u32 },

    #[error("failed to start worker thread")]
    Worker(#[source] io::Error),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// A classification attempt failed. Always recovered locally.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference backend failed: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("invalid classifier output: {0}")]
    InvalidOutput(String),

    #[error("classifier panicked: {0}")]
    Panicked(String),
}

/// A snapshot request failed. Reported to the requester only.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no frame has been captured yet")]
    NoFrame,

    #[error("snapshot queue is full")]
    Busy,

    #[error("capture session is not running")]
    NotRunning,

    #[error("failed to write snapshot image")]
    Image(#[from] image::ImageError),

    /// The image is on disk but its metadata sidecar is not. `record`
    /// describes the saved image and can be handed back to
    /// [`SnapshotWriter::write_metadata`](crate::snapshot::SnapshotWriter::write_metadata).
    #[error("image saved to {} but metadata write failed", record.image_path.display())]
    Metadata {
        record: Box<SnapshotRecord>,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}
