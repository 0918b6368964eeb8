// SPDX-License-Identifier: MPL-2.0

//! Error types for the camera core
//!
//! Each concern has its own enum; [`AppError`] wraps them for callers that
//! only need to report a failure.

use crate::backends::camera::{BackendError, CameraFacing, SessionState};
use crate::pipelines::photo::BurstReport;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("Photo error: {0}")]
    Photo(#[from] PhotoError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

/// Device selection and configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    /// No camera with the requested facing exists
    #[error("No {0} camera found")]
    NoMatchingDevice(CameraFacing),
    /// The camera exposes no capability map or no JPEG sizes
    #[error("Camera {0} reports no supported still sizes")]
    NoSupportedSize(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Capture request errors
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Capture requested outside `SessionReady`; hardware was not touched
    #[error("Capture session not ready (state: {0})")]
    SessionNotReady(SessionState),
    #[error("A burst capture is already in progress")]
    BurstInProgress,
    #[error("Burst size must be at least one frame")]
    InvalidBurstSize,
    /// Fewer frames than requested reached the post-processor
    ///
    /// Frames that did arrive were persisted and are listed in `report`.
    #[error("Partial burst: {delivered} of {expected} frames delivered")]
    PartialBurst {
        delivered: usize,
        expected: usize,
        report: BurstReport,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Camera controller is no longer running")]
    ControllerGone,
}

/// Per-frame post-processing errors
#[derive(Debug, thiserror::Error)]
pub enum PhotoError {
    #[error("Failed to decode frame {index}: {message}")]
    Decode { index: usize, message: String },
    #[error("Failed to encode frame {index}: {message}")]
    Encode { index: usize, message: String },
    /// Writing or finalizing the file failed
    #[error("Failed to persist {name}: {source}")]
    PersistFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Photo worker failed: {0}")]
    Worker(String),
}

/// Configuration load/save errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("No configuration directory available")]
    NoConfigDir,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_burst_message_names_counts() {
        let err = CaptureError::PartialBurst {
            delivered: 7,
            expected: 10,
            report: BurstReport::new(1, 10),
        };
        assert_eq!(err.to_string(), "Partial burst: 7 of 10 frames delivered");
    }

    #[test]
    fn test_backend_error_converts_into_camera_error() {
        let err: CameraError = BackendError::PermissionDenied.into();
        assert_eq!(err, CameraError::Backend(BackendError::PermissionDenied));
    }
}
