// SPDX-License-Identifier: MPL-2.0

//! Application facade
//!
//! Wires configuration, camera platform, photo storage and the session
//! controller together and exposes the operations a UI drives:
//! surface lifecycle, permission and rotation updates, capture requests and
//! the latest saved photo.

use crate::backends::camera::{
    CameraPlatform, CaptureSessionController, ControllerHandle, DisplayRotation,
};
use crate::config::Config;
use crate::errors::CaptureError;
use crate::notifications::{Notification, Notifier};
use crate::pipelines::photo::{BurstCoordinator, BurstReport, ImagePostProcessor};
use crate::storage::{
    self, FsMediaStore, MediaStore, PersistedImage, PersistedImageRegistry,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

pub struct CameraApp {
    config: Config,
    controller: ControllerHandle,
    registry: PersistedImageRegistry,
    notifier: Notifier,
    photos_dir: PathBuf,
}

impl CameraApp {
    /// Start the camera core, storing photos in the configured album
    ///
    /// Returns the app together with the notification stream.
    pub async fn start(
        config: Config,
        platform: Arc<dyn CameraPlatform>,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let store = Arc::new(FsMediaStore::new(config.photos_dir()));
        Self::with_store(config, platform, store).await
    }

    /// Start the camera core with a custom photo store
    pub async fn with_store(
        config: Config,
        platform: Arc<dyn CameraPlatform>,
        store: Arc<dyn MediaStore>,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let photos_dir = store.root().to_path_buf();
        let latest = storage::latest_persisted(photos_dir.clone()).await;
        let (publisher, registry) = storage::image_registry(latest);
        let (notifier, notifications) = Notifier::channel();

        let processor = Arc::new(ImagePostProcessor::new(
            store,
            publisher,
            config.jpeg_quality,
        ));
        let coordinator =
            BurstCoordinator::new(processor, notifier.clone(), config.burst_timeout());
        let controller = CaptureSessionController::spawn(
            platform,
            config.controller_settings(),
            coordinator,
            notifier.clone(),
        );

        info!(
            photos = %photos_dir.display(),
            burst = config.burst_count,
            "Camera started"
        );

        (
            Self {
                config,
                controller,
                registry,
                notifier,
                photos_dir,
            },
            notifications,
        )
    }

    pub fn on_surface_available(&self, width: u32, height: u32) {
        self.controller.surface_available(width, height);
    }

    pub fn on_surface_destroyed(&self) {
        self.controller.surface_destroyed();
    }

    /// Take a single photo
    pub async fn request_capture(&self) -> Result<BurstReport, CaptureError> {
        self.controller.capture().await
    }

    /// Take a burst of the configured length
    pub async fn request_burst(&self) -> Result<BurstReport, CaptureError> {
        self.controller.capture_burst(self.config.burst_count).await
    }

    pub fn request_facing_switch(&self) {
        self.controller.switch_facing();
    }

    pub fn on_permission_result(&self, granted: bool) {
        self.controller.set_permission(granted);
    }

    pub fn on_display_rotation(&self, degrees: i32) {
        self.controller
            .set_display_rotation(DisplayRotation::from_degrees(degrees));
    }

    pub fn pause(&self) {
        self.controller.pause();
    }

    pub fn resume(&self) {
        self.controller.resume();
    }

    /// Most recently saved photo
    ///
    /// Emits [`Notification::ImageUnavailable`] when there is none.
    pub fn latest_image(&self) -> Option<PersistedImage> {
        let latest = self.registry.latest();
        if latest.is_none() {
            self.notifier.notify(Notification::ImageUnavailable);
        }
        latest
    }

    pub fn registry(&self) -> PersistedImageRegistry {
        self.registry.clone()
    }

    pub fn controller(&self) -> &ControllerHandle {
        &self.controller
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn photos_dir(&self) -> &Path {
        &self.photos_dir
    }

    pub async fn shutdown(&self) {
        info!("Shutting down camera");
        self.controller.shutdown().await;
    }
}
