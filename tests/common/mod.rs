// SPDX-License-Identifier: MPL-2.0
// Shared by several test binaries; each uses a subset
#![allow(dead_code)]

//! Helpers for driving the camera core against the software platform

use burst_camera::backends::camera::{CameraPlatform, SessionState, StateTransition};
use burst_camera::storage::MediaStore;
use burst_camera::{CameraApp, Config, Notification, VirtualPlatform};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Virtual platform with short delays
pub fn fast_platform() -> VirtualPlatform {
    VirtualPlatform::default()
        .with_open_delay(Duration::from_millis(10))
        .with_frame_interval(Duration::from_millis(2))
}

pub fn config_for(dir: &Path) -> Config {
    Config {
        photo_dir: Some(dir.to_path_buf()),
        burst_timeout_ms: 2000,
        ..Config::default()
    }
}

pub async fn start(
    platform: &VirtualPlatform,
    config: Config,
) -> (CameraApp, mpsc::UnboundedReceiver<Notification>) {
    let platform: Arc<dyn CameraPlatform> = Arc::new(platform.clone());
    CameraApp::start(config, platform).await
}

pub async fn start_with_store(
    platform: &VirtualPlatform,
    config: Config,
    store: Arc<dyn MediaStore>,
) -> (CameraApp, mpsc::UnboundedReceiver<Notification>) {
    let platform: Arc<dyn CameraPlatform> = Arc::new(platform.clone());
    CameraApp::with_store(config, platform, store).await
}

/// Open the camera and wait for `SessionReady`
pub async fn open(app: &CameraApp) {
    app.on_surface_available(1920, 1080);
    wait_ready(app).await;
}

pub async fn wait_ready(app: &CameraApp) {
    tokio::time::timeout(
        TIMEOUT,
        app.controller().wait_for_state(SessionState::is_ready),
    )
    .await
    .expect("timed out waiting for SessionReady")
    .expect("controller stopped");
}

/// Poll `condition` until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

/// Collect transition targets until one matches `target`
pub async fn transitions_until(
    rx: &mut broadcast::Receiver<StateTransition>,
    target: impl Fn(&SessionState) -> bool,
) -> Vec<SessionState> {
    let mut seen = Vec::new();
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let transition = rx.recv().await.expect("transition stream closed");
            let done = target(&transition.to);
            seen.push(transition.to);
            if done {
                break;
            }
        }
    })
    .await
    .expect("timed out waiting for transition");
    seen
}

/// Wait for `expected`, skipping other notifications
pub async fn expect_notification(
    rx: &mut mpsc::UnboundedReceiver<Notification>,
    expected: Notification,
) {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match rx.recv().await {
                Some(notification) if notification == expected => break,
                Some(_) => continue,
                None => panic!("notification stream closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {expected:?}"));
}

/// Finished photos in `dir`, sorted by name
pub fn photos_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
