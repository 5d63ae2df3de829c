//! Session configuration and defaults.

use crate::error::OpenError;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Classes the default chili leaf model was trained on, in output order.
pub const DEFAULT_LABELS: [&str; 5] =
    ["healthy", "leaf_curl", "leaf_spot", "whitefly", "yellowish"];

/// The class that means "nothing to report".
pub const DEFAULT_HEALTHY_LABEL: &str = "healthy";

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;

pub const DEFAULT_INFERENCE_INTERVAL: Duration = Duration::from_secs(2);

/// Requested camera configuration.
///
/// The device may negotiate a nearby format; the values actually in use are
/// reported by [`crate::capture::FrameSource::format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureSettings {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

impl CaptureSettings {
    /// Reject requests no device could satisfy.
    pub fn validate(&self) -> Result<(), OpenError> {
        if self.width == 0 || self.height == 0 || self.fps == 0 {
            return Err(OpenError::ConfigurationRejected {
                width: self.width,
                height: self.height,
                fps: self.fps,
                reason: "width, height and fps must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Thresholds used to judge a classification.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayPolicy {
    /// Label of the "no issue" class
    pub healthy_label: String,
    /// Minimum confidence for a result to count as certain
    pub confidence_threshold: f32,
}

impl Default for OverlayPolicy {
    fn default() -> Self {
        Self {
            healthy_label: DEFAULT_HEALTHY_LABEL.to_string(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl OverlayPolicy {
    pub fn is_confident(&self, confidence: f32) -> bool {
        confidence >= self.confidence_threshold
    }

    /// A non-healthy class at or above the threshold.
    pub fn is_flagged(&self, label: &str, confidence: f32) -> bool {
        label != self.healthy_label && self.is_confident(confidence)
    }
}

/// Everything a [`crate::CaptureSession`] needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub capture: CaptureSettings,
    /// Minimum time between inference dispatches
    pub inference_interval: Duration,
    pub overlay: OverlayPolicy,
    /// Directory for snapshot images and sidecars
    pub snapshot_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            inference_interval: DEFAULT_INFERENCE_INTERVAL,
            overlay: OverlayPolicy::default(),
            snapshot_dir: PathBuf::from("captures"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment() {
        let config = SessionConfig::default();
        assert_eq!(
            config.capture,
            CaptureSettings {
                device_index: 0,
                width: 640,
                height: 480,
                fps: 30
            }
        );
        assert_eq!(config.inference_interval, Duration::from_secs(2));
        assert_eq!(config.overlay.confidence_threshold, 0.7);
        assert_eq!(config.snapshot_dir, PathBuf::from("captures"));
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let settings = CaptureSettings {
            width: 0,
            ..CaptureSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(OpenError::ConfigurationRejected { width: 0, .. })
        ));
        assert!(CaptureSettings::default().validate().is_ok());
    }

    #[test]
    fn healthy_label_is_never_flagged() {
        let policy = OverlayPolicy::default();
        assert!(!policy.is_flagged("healthy", 0.99));
        assert!(policy.is_flagged("leaf_spot", 0.7));
        assert!(!policy.is_flagged("leaf_spot", 0.69));
    }
}
