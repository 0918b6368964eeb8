// SPDX-License-Identifier: GPL-3.0-only

//! Orientation correction for captured stills
//!
//! Sensors deliver frames in their native landscape orientation. The still
//! is rotated so it displays upright for the display rotation at capture
//! time; front sensors are mounted the other way round and get an extra
//! half turn.

use crate::backends::camera::types::{CameraFacing, DisplayRotation};
use image::{ImageFormat, RgbImage};

/// Encoded still as delivered by the image reader
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub capture_index: usize,
    pub bytes: Vec<u8>,
}

/// What the post-processor needs to know about the device at capture time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrientationContext {
    pub display_rotation: DisplayRotation,
    pub facing: CameraFacing,
}

impl OrientationContext {
    pub fn new(display_rotation: DisplayRotation, facing: CameraFacing) -> Self {
        Self {
            display_rotation,
            facing,
        }
    }

    /// Clockwise rotation to apply to the still, in degrees
    pub fn rotation_degrees(&self) -> u32 {
        let base = match self.display_rotation {
            DisplayRotation::Rotation0 => 90,
            DisplayRotation::Rotation90 => 0,
            DisplayRotation::Rotation180 => 270,
            DisplayRotation::Rotation270 => 180,
        };
        let flip = if self.facing.is_front() { 180 } else { 0 };
        (base + flip) % 360
    }
}

/// Decode a JPEG still into RGB
pub fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage, String> {
    image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map(|img| img.to_rgb8())
        .map_err(|e| format!("JPEG decoding failed: {}", e))
}

/// Rotate clockwise by a multiple of 90 degrees
pub fn rotate(image: RgbImage, degrees: u32) -> RgbImage {
    match degrees % 360 {
        90 => image::imageops::rotate90(&image),
        180 => image::imageops::rotate180(&image),
        270 => image::imageops::rotate270(&image),
        _ => image,
    }
}

/// Decode `bytes` and bring the still upright for `ctx`
pub fn decode_and_rotate(bytes: &[u8], ctx: OrientationContext) -> Result<RgbImage, String> {
    let decoded = decode_jpeg(bytes)?;
    Ok(rotate(decoded, ctx.rotation_degrees()))
}

/// Dimensions after rotation
pub fn rotated_dimensions(width: u32, height: u32, degrees: u32) -> (u32, u32) {
    match degrees % 360 {
        90 | 270 => (height, width),
        _ => (width, height),
    }
}
