// SPDX-License-Identifier: MPL-2.0

//! Async photo pipeline
//!
//! ```text
//! ImageReader listener → BurstCoordinator → ImagePostProcessor
//!   (producer thread)      (reorder, wait)    decode → rotate → encode → persist
//!                                                   ↓
//!                                         PersistedImageRegistry
//! ```
//!
//! The listener only copies bytes out of the reader and hands them to the
//! coordinator, so the pool slot is released immediately. Decoding,
//! rotation, encoding and the two-phase write run on the blocking pool.
//! Frames are processed one at a time in capture order, which keeps file
//! timestamps in the same order as the frames.

pub mod burst;
pub mod encoding;
pub mod processing;

pub use burst::{BurstCoordinator, BurstReport, FrameFailure, PendingBurst};
pub use encoding::{EncodingQuality, PhotoEncoder};
pub use processing::{OrientationContext, RawFrame};

use crate::errors::PhotoError;
use crate::storage::{
    CaptureClock, ImageRegistryPublisher, MediaStore, PersistedImage, photo_file_name,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Turns raw stills into upright JPEGs in the album
///
/// Holds the only [`ImageRegistryPublisher`], so every published image has
/// already been finalized on disk.
pub struct ImagePostProcessor {
    store: Arc<dyn MediaStore>,
    clock: CaptureClock,
    publisher: ImageRegistryPublisher,
    encoder: PhotoEncoder,
}

impl ImagePostProcessor {
    pub fn new(
        store: Arc<dyn MediaStore>,
        publisher: ImageRegistryPublisher,
        quality: EncodingQuality,
    ) -> Self {
        Self {
            store,
            clock: CaptureClock::new(),
            publisher,
            encoder: PhotoEncoder::new(quality),
        }
    }

    /// Decode, rotate, re-encode and persist one frame, then publish it
    ///
    /// Nothing is published when any step fails.
    pub async fn process(
        &self,
        frame: RawFrame,
        ctx: OrientationContext,
    ) -> Result<PersistedImage, PhotoError> {
        let index = frame.capture_index;
        let timestamp = self.clock.next();
        let display_name = photo_file_name(&timestamp);

        debug!(
            index,
            size = frame.bytes.len(),
            rotation = ctx.rotation_degrees(),
            name = %display_name,
            "Processing frame"
        );

        let store = Arc::clone(&self.store);
        let encoder = self.encoder;
        let name = display_name.clone();
        let path = tokio::task::spawn_blocking(move || {
            let upright = processing::decode_and_rotate(&frame.bytes, ctx)
                .map_err(|message| PhotoError::Decode { index, message })?;
            let jpeg = encoder
                .encode_jpeg(&upright)
                .map_err(|message| PhotoError::Encode { index, message })?;
            store
                .write(&name, &jpeg)
                .map_err(|source| PhotoError::PersistFailed { name, source })
        })
        .await
        .map_err(|e| PhotoError::Worker(e.to_string()))??;

        let image = PersistedImage {
            path,
            display_name,
            timestamp,
        };
        info!(index, path = %image.path.display(), "Photo saved");
        self.publisher.publish(image.clone());
        Ok(image)
    }
}

impl std::fmt::Debug for ImagePostProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePostProcessor")
            .field("root", &self.store.root())
            .field("quality", &self.encoder.quality())
            .finish()
    }
}
