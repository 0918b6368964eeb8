// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera backends

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Direction a physical camera points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CameraFacing {
    /// Selfie camera, same side as the display
    Front,
    /// Main camera, opposite side of the display
    #[default]
    Back,
}

impl CameraFacing {
    /// Map a "prefer front" flag to a facing
    pub fn from_prefer_front(prefer_front: bool) -> Self {
        if prefer_front {
            CameraFacing::Front
        } else {
            CameraFacing::Back
        }
    }

    /// The opposite facing
    pub fn flipped(self) -> Self {
        match self {
            CameraFacing::Front => CameraFacing::Back,
            CameraFacing::Back => CameraFacing::Front,
        }
    }

    pub fn is_front(self) -> bool {
        self == CameraFacing::Front
    }
}

impl std::fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraFacing::Front => write!(f, "front"),
            CameraFacing::Back => write!(f, "back"),
        }
    }
}

/// Frame or surface dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel count
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// True if both dimensions are no larger than `bound`
    pub fn fits_within(&self, bound: Resolution) -> bool {
        self.width <= bound.width && self.height <= bound.height
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Output stream formats a device advertises sizes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// Encoded still images
    Jpeg,
    /// Opaque preview surface buffers
    Preview,
}

/// Supported output sizes per format
///
/// Mirrors the capability map a platform reports for each camera. A camera
/// without a map cannot be configured at all.
#[derive(Debug, Clone, Default)]
pub struct StreamConfigurationMap {
    output_sizes: HashMap<OutputFormat, Vec<Resolution>>,
}

impl StreamConfigurationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper used by platforms when assembling the map
    pub fn with_sizes(mut self, format: OutputFormat, sizes: Vec<Resolution>) -> Self {
        self.output_sizes.insert(format, sizes);
        self
    }

    /// Sizes advertised for `format` (empty if none)
    pub fn output_sizes(&self, format: OutputFormat) -> &[Resolution] {
        self.output_sizes
            .get(&format)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Static properties of one camera as reported by the platform
#[derive(Debug, Clone, Default)]
pub struct CameraCharacteristics {
    /// Lens facing; `None` for external cameras that report nothing
    pub facing: Option<CameraFacing>,
    /// Capability map; `None` when the platform does not expose one
    pub stream_configuration: Option<StreamConfigurationMap>,
}

/// A physical camera chosen for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDescriptor {
    pub id: String,
    pub facing: CameraFacing,
    pub max_still_size: Resolution,
}

/// Rotation of the display relative to its natural orientation
///
/// Reported by the UI layer; combined with the camera facing to decide how
/// captured stills are rotated before saving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayRotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl DisplayRotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => DisplayRotation::Rotation90,
            180 => DisplayRotation::Rotation180,
            270 => DisplayRotation::Rotation270,
            _ => DisplayRotation::Rotation0,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            DisplayRotation::Rotation0 => 0,
            DisplayRotation::Rotation90 => 90,
            DisplayRotation::Rotation180 => 180,
            DisplayRotation::Rotation270 => 270,
        }
    }
}

impl std::fmt::Display for DisplayRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Live preview target handed to a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewSurface {
    pub size: Resolution,
}

impl PreviewSurface {
    pub fn new(size: Resolution) -> Self {
        Self { size }
    }
}

/// Correlates one still-capture request with the image it produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureToken {
    /// Batch the request was submitted in
    pub batch: u64,
    /// Position of the request within its batch
    pub index: usize,
}

/// Request template, matching what the platform tunes the pipeline for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    Preview,
    StillCapture,
}

/// A single capture request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub template: RequestTemplate,
    /// Size of the surface the request renders into
    pub target_size: Resolution,
    /// Present for still requests; preview requests produce no tracked image
    pub token: Option<CaptureToken>,
}

impl CaptureRequest {
    /// Repeating preview request into the preview surface
    pub fn preview(size: Resolution) -> Self {
        Self {
            template: RequestTemplate::Preview,
            target_size: size,
            token: None,
        }
    }

    /// Still-capture request into the image reader surface
    pub fn still(size: Resolution, token: CaptureToken) -> Self {
        Self {
            template: RequestTemplate::StillCapture,
            target_size: size,
            token: Some(token),
        }
    }
}

/// Ordered still-capture requests submitted together
#[derive(Debug, Clone)]
pub struct CaptureRequestBatch {
    id: u64,
    requests: Vec<CaptureRequest>,
}

impl CaptureRequestBatch {
    /// Build `count` independent still requests against the same surface
    pub fn still(id: u64, count: usize, size: Resolution) -> Self {
        let requests = (0..count)
            .map(|index| CaptureRequest::still(size, CaptureToken { batch: id, index }))
            .collect();
        Self { id, requests }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn requests(&self) -> &[CaptureRequest] {
        &self.requests
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Backend is not available on this system
    #[error("Backend not available: {0}")]
    NotAvailable(String),
    /// Camera device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    /// Camera permission has not been granted
    #[error("Camera permission denied")]
    PermissionDenied,
    /// The device handle was already closed
    #[error("Camera device is closed")]
    DeviceClosed,
    /// The capture session was already closed
    #[error("Capture session is closed")]
    SessionClosed,
    /// The image reader was already closed
    #[error("Image reader is closed")]
    ReaderClosed,
    /// Every buffer in the image reader pool is in use
    #[error("Image buffer pool exhausted ({capacity} buffers in use)")]
    BufferPoolExhausted { capacity: usize },
    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_tokens_are_sequential() {
        let batch = CaptureRequestBatch::still(7, 10, Resolution::new(64, 48));
        assert_eq!(batch.len(), 10);
        for (i, request) in batch.requests().iter().enumerate() {
            assert_eq!(request.template, RequestTemplate::StillCapture);
            assert_eq!(request.token, Some(CaptureToken { batch: 7, index: i }));
        }
    }

    #[test]
    fn test_display_rotation_normalises() {
        assert_eq!(DisplayRotation::from_degrees(-90), DisplayRotation::Rotation270);
        assert_eq!(DisplayRotation::from_degrees(450), DisplayRotation::Rotation90);
        assert_eq!(DisplayRotation::from_degrees(45), DisplayRotation::Rotation0);
    }

    #[test]
    fn test_missing_format_has_no_sizes() {
        let map = StreamConfigurationMap::new()
            .with_sizes(OutputFormat::Jpeg, vec![Resolution::new(640, 480)]);
        assert!(map.output_sizes(OutputFormat::Preview).is_empty());
        assert_eq!(map.output_sizes(OutputFormat::Jpeg).len(), 1);
    }
}
