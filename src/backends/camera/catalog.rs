// SPDX-License-Identifier: GPL-3.0-only

//! Camera enumeration and session negotiation
//!
//! Nothing here is cached: device ids are not guaranteed to stay the same
//! across a facing switch, so every configuration attempt queries the
//! platform again.

use super::CameraPlatform;
use super::types::{CameraDescriptor, CameraFacing, OutputFormat, Resolution};
use crate::errors::CameraError;
use tracing::{debug, info, warn};

/// Read-only view over the cameras a platform exposes
pub struct DeviceCatalog<'a> {
    platform: &'a dyn CameraPlatform,
}

impl<'a> DeviceCatalog<'a> {
    pub fn new(platform: &'a dyn CameraPlatform) -> Self {
        Self { platform }
    }

    /// Pick the first camera facing the requested side
    ///
    /// Fails with [`CameraError::NoMatchingDevice`] rather than falling back
    /// to the other side.
    pub fn select_device(&self, prefer_front: bool) -> Result<CameraDescriptor, CameraError> {
        let wanted = CameraFacing::from_prefer_front(prefer_front);

        for id in self.platform.camera_ids()? {
            let characteristics = match self.platform.characteristics(&id) {
                Ok(c) => c,
                Err(e) => {
                    warn!(camera = %id, error = %e, "Skipping camera with unreadable characteristics");
                    continue;
                }
            };
            if characteristics.facing != Some(wanted) {
                continue;
            }

            let max_still_size = self.largest_jpeg_size(&id)?;
            info!(camera = %id, facing = %wanted, max_still = %max_still_size, "Selected camera");
            return Ok(CameraDescriptor {
                id,
                facing: wanted,
                max_still_size,
            });
        }

        Err(CameraError::NoMatchingDevice(wanted))
    }

    /// Largest JPEG-capable output size of the camera, by pixel count
    pub fn max_still_size(&self, descriptor: &CameraDescriptor) -> Result<Resolution, CameraError> {
        self.largest_jpeg_size(&descriptor.id)
    }

    /// Preview sizes advertised by the camera (empty when none)
    pub fn preview_sizes(&self, id: &str) -> Result<Vec<Resolution>, CameraError> {
        let characteristics = self.platform.characteristics(id)?;
        Ok(characteristics
            .stream_configuration
            .map(|map| map.output_sizes(OutputFormat::Preview).to_vec())
            .unwrap_or_default())
    }

    /// Every camera that can be configured, in platform order
    ///
    /// Cameras without a facing or without still sizes are skipped.
    pub fn enumerate(&self) -> Result<Vec<CameraDescriptor>, CameraError> {
        let mut cameras = Vec::new();
        for id in self.platform.camera_ids()? {
            let Some(facing) = self.platform.characteristics(&id)?.facing else {
                debug!(camera = %id, "Skipping camera without facing");
                continue;
            };
            match self.largest_jpeg_size(&id) {
                Ok(max_still_size) => cameras.push(CameraDescriptor {
                    id,
                    facing,
                    max_still_size,
                }),
                Err(e) => debug!(camera = %id, error = %e, "Skipping camera"),
            }
        }
        Ok(cameras)
    }

    fn largest_jpeg_size(&self, id: &str) -> Result<Resolution, CameraError> {
        let map = self
            .platform
            .characteristics(id)?
            .stream_configuration
            .ok_or_else(|| CameraError::NoSupportedSize(id.to_string()))?;

        map.output_sizes(OutputFormat::Jpeg)
            .iter()
            .copied()
            .max_by_key(Resolution::area)
            .ok_or_else(|| CameraError::NoSupportedSize(id.to_string()))
    }
}

/// Negotiated capture configuration
///
/// `still_size` is fixed for the lifetime of the session; changing it means
/// closing and configuring a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub device_id: String,
    pub facing: CameraFacing,
    pub preview_size: Resolution,
    pub still_size: Resolution,
}

impl SessionConfig {
    /// Build the configuration for `descriptor`
    ///
    /// The preview uses the largest advertised preview size that fits in
    /// `max_preview`; without advertised sizes `max_preview` is used, clamped
    /// to the still size.
    pub fn negotiate(
        catalog: &DeviceCatalog<'_>,
        descriptor: &CameraDescriptor,
        surface: Resolution,
        max_preview: Resolution,
    ) -> Result<Self, CameraError> {
        let still_size = catalog.max_still_size(descriptor)?;

        let preview_size = catalog
            .preview_sizes(&descriptor.id)?
            .into_iter()
            .filter(|size| size.fits_within(max_preview))
            .max_by_key(Resolution::area)
            .unwrap_or_else(|| {
                Resolution::new(
                    max_preview.width.min(still_size.width),
                    max_preview.height.min(still_size.height),
                )
            });

        debug!(
            camera = %descriptor.id,
            %surface,
            preview = %preview_size,
            still = %still_size,
            "Negotiated session configuration"
        );

        Ok(Self {
            device_id: descriptor.id.clone(),
            facing: descriptor.facing,
            preview_size,
            still_size,
        })
    }
}
