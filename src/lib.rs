//! Live crop-disease classification over a camera feed.
//!
//! Frames are captured at device rate, a throttled subset is classified on a
//! background worker, and the latest result is overlaid on every displayed
//! frame. Snapshots with classification metadata are written on request.

pub mod capture;
pub mod classify;
pub mod config;
pub mod error;
pub mod frame;
pub mod inference;
pub mod knowledge;
pub mod output;
pub mod overlay;
pub mod session;
pub mod snapshot;

pub use config::{CaptureSettings, OverlayPolicy, SessionConfig};
pub use error::{CaptureError, InferenceError, OpenError, SnapshotError};
pub use frame::Frame;
pub use session::{CaptureSession, Control, DeviceState, DeviceStatus, RunSummary, SessionHandle};
