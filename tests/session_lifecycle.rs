// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the capture session state machine

mod common;

use burst_camera::backends::camera::{
    CameraFacing, Resolution, SessionFailure, SessionState,
};
use burst_camera::backends::virtual_camera::{OpenFailure, VirtualCameraSpec, VirtualPlatform};
use burst_camera::{CaptureError, Config, Notification};
use common::*;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_surface_opens_session_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let platform = fast_platform();
    let (app, _notifications) = start(&platform, config_for(dir.path())).await;
    let mut transitions = app.controller().subscribe_transitions();

    app.on_surface_available(1920, 1080);
    let seen = transitions_until(&mut transitions, SessionState::is_ready).await;

    assert_eq!(
        seen,
        vec![
            SessionState::Configuring,
            SessionState::Opening,
            SessionState::DeviceReady,
            SessionState::SessionConfiguring,
            SessionState::SessionReady,
        ]
    );

    let config = app.controller().active_config().unwrap();
    assert_eq!(config.device_id, "0");
    assert_eq!(config.facing, CameraFacing::Back);
    assert_eq!(config.still_size, Resolution::new(64, 48));
    assert_eq!(config.preview_size, Resolution::new(64, 48));
    assert_eq!(platform.open_count(), 1);
    assert_eq!(platform.devices_open(), 1);

    app.shutdown().await;
    assert_eq!(platform.devices_open(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_capture_before_ready_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let platform = fast_platform().with_open_delay(Duration::from_millis(300));
    let (app, mut notifications) = start(&platform, config_for(dir.path())).await;

    let err = app.request_capture().await.unwrap_err();
    assert!(matches!(err, CaptureError::SessionNotReady(SessionState::Idle)));

    app.on_surface_available(1920, 1080);
    let err = app.request_burst().await.unwrap_err();
    assert!(matches!(err, CaptureError::SessionNotReady(SessionState::Opening)));
    expect_notification(&mut notifications, Notification::CameraNotReady).await;

    wait_ready(&app).await;
    assert!(photos_in(dir.path()).is_empty());
    app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_platform_permission_denial_returns_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let platform = fast_platform().with_open_failure(OpenFailure::PermissionDenied);
    let (app, mut notifications) = start(&platform, config_for(dir.path())).await;
    let mut transitions = app.controller().subscribe_transitions();

    app.on_surface_available(1920, 1080);
    expect_notification(&mut notifications, Notification::PermissionDenied).await;
    let seen = transitions_until(&mut transitions, |s| *s == SessionState::Idle).await;

    assert_eq!(
        seen,
        vec![
            SessionState::Configuring,
            SessionState::Opening,
            SessionState::Error(SessionFailure::PermissionDenied),
            SessionState::Closing,
            SessionState::Idle,
        ]
    );
    assert_eq!(app.controller().state(), SessionState::Idle);
    assert_eq!(platform.open_count(), 0);
    assert_eq!(platform.devices_open(), 0);
    app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_permission_grant_starts_preview() {
    let dir = tempfile::tempdir().unwrap();
    let platform = fast_platform();
    let (app, mut notifications) = start(&platform, config_for(dir.path())).await;

    app.on_permission_result(false);
    app.on_surface_available(1920, 1080);
    expect_notification(&mut notifications, Notification::PermissionDenied).await;
    assert_eq!(platform.open_count(), 0);

    app.on_permission_result(true);
    wait_ready(&app).await;
    assert_eq!(platform.open_count(), 1);

    app.on_permission_result(false);
    wait_until(|| platform.devices_open() == 0).await;
    app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_switch_while_opening_never_opens_two_devices() {
    let dir = tempfile::tempdir().unwrap();
    let platform = fast_platform().with_open_delay(Duration::from_millis(150));
    let (app, _notifications) = start(&platform, config_for(dir.path())).await;

    app.on_surface_available(1920, 1080);
    app.request_facing_switch();

    wait_until(|| {
        app.controller().state().is_ready()
            && app
                .controller()
                .active_config()
                .is_some_and(|c| c.facing == CameraFacing::Front)
    })
    .await;

    assert_eq!(platform.max_concurrent_opens(), 1);
    assert_eq!(platform.open_count(), 2);
    assert_eq!(platform.devices_open(), 1);
    assert_eq!(app.controller().active_config().unwrap().device_id, "1");
    app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_switch_facing_twice_returns_to_back() {
    let dir = tempfile::tempdir().unwrap();
    let platform = fast_platform();
    let (app, _notifications) = start(&platform, config_for(dir.path())).await;
    open(&app).await;

    app.request_facing_switch();
    app.request_facing_switch();
    wait_until(|| platform.open_count() == 3 && app.controller().state().is_ready()).await;

    assert_eq!(
        app.controller().active_config().unwrap().facing,
        CameraFacing::Back
    );
    assert_eq!(platform.max_concurrent_opens(), 1);
    app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_closes_and_waits_for_next_event() {
    let dir = tempfile::tempdir().unwrap();
    let platform = fast_platform();
    let (app, mut notifications) = start(&platform, config_for(dir.path())).await;
    open(&app).await;
    let mut transitions = app.controller().subscribe_transitions();

    assert!(platform.disconnect_active());
    let seen = transitions_until(&mut transitions, |s| *s == SessionState::Idle).await;

    assert_eq!(
        seen,
        vec![
            SessionState::Error(SessionFailure::Disconnected),
            SessionState::Closing,
            SessionState::Idle,
        ]
    );
    expect_notification(&mut notifications, Notification::CameraError).await;
    assert_eq!(platform.devices_open(), 0);
    assert!(app.controller().active_config().is_none());

    // No automatic retry
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(platform.open_count(), 1);

    // The next lifecycle event reopens
    app.resume();
    wait_ready(&app).await;
    assert_eq!(platform.open_count(), 2);
    app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_configure_failure_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let platform = fast_platform().with_configure_failure();
    let (app, mut notifications) = start(&platform, config_for(dir.path())).await;
    let mut transitions = app.controller().subscribe_transitions();

    app.on_surface_available(1920, 1080);
    let seen = transitions_until(&mut transitions, |s| *s == SessionState::Idle).await;

    assert!(seen.contains(&SessionState::Error(SessionFailure::ConfigureFailed)));
    expect_notification(&mut notifications, Notification::CameraError).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(platform.open_count(), 1);
    assert_eq!(platform.devices_open(), 0);
    app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_device_error_code_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let platform = fast_platform().with_open_failure(OpenFailure::Error(3));
    let (app, mut notifications) = start(&platform, config_for(dir.path())).await;
    let mut transitions = app.controller().subscribe_transitions();

    app.on_surface_available(1920, 1080);
    let seen = transitions_until(&mut transitions, |s| *s == SessionState::Idle).await;

    assert!(seen.contains(&SessionState::Error(SessionFailure::DeviceError(3))));
    expect_notification(&mut notifications, Notification::CameraError).await;
    assert_eq!(platform.devices_open(), 0);

    platform.clear_open_failure();
    app.on_surface_available(1920, 1080);
    wait_ready(&app).await;
    app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_front_camera_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let platform = VirtualPlatform::new(vec![VirtualCameraSpec::new(
        "0",
        CameraFacing::Back,
        Resolution::new(64, 48),
    )]);
    let config = Config {
        prefer_front_camera: true,
        ..config_for(dir.path())
    };
    let (app, mut notifications) = start(&platform, config).await;

    app.on_surface_available(1920, 1080);
    expect_notification(&mut notifications, Notification::CameraUnavailable).await;

    assert_eq!(app.controller().state(), SessionState::Idle);
    assert_eq!(platform.open_count(), 0);
    app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_camera_without_capabilities_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let platform = VirtualPlatform::new(vec![
        VirtualCameraSpec::new("0", CameraFacing::Back, Resolution::new(64, 48))
            .without_capabilities(),
    ]);
    let (app, mut notifications) = start(&platform, config_for(dir.path())).await;

    app.on_surface_available(1920, 1080);
    expect_notification(&mut notifications, Notification::CameraUnavailable).await;
    assert_eq!(platform.open_count(), 0);
    app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pause_and_resume() {
    let dir = tempfile::tempdir().unwrap();
    let platform = fast_platform();
    let (app, _notifications) = start(&platform, config_for(dir.path())).await;
    open(&app).await;

    app.pause();
    wait_until(|| platform.devices_open() == 0).await;
    assert_eq!(app.controller().state(), SessionState::Idle);

    app.resume();
    wait_ready(&app).await;
    assert_eq!(platform.open_count(), 2);
    app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_surface_resize_reconfigures() {
    let dir = tempfile::tempdir().unwrap();
    let platform = fast_platform();
    let (app, _notifications) = start(&platform, config_for(dir.path())).await;
    open(&app).await;

    // Same size again is not a change
    app.on_surface_available(1920, 1080);
    app.on_surface_available(1280, 720);
    wait_until(|| platform.open_count() == 2 && app.controller().state().is_ready()).await;

    assert_eq!(platform.max_concurrent_opens(), 1);
    app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_surface_destroyed_closes_camera() {
    let dir = tempfile::tempdir().unwrap();
    let platform = fast_platform();
    let (app, _notifications) = start(&platform, config_for(dir.path())).await;
    open(&app).await;

    app.on_surface_destroyed();
    wait_until(|| platform.devices_open() == 0).await;

    // Resume without a surface stays closed
    app.resume();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(platform.open_count(), 1);
    app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_is_final() {
    let dir = tempfile::tempdir().unwrap();
    let platform = fast_platform();
    let (app, _notifications) = start(&platform, config_for(dir.path())).await;
    open(&app).await;

    app.shutdown().await;
    app.shutdown().await;

    assert_eq!(platform.devices_open(), 0);
    assert!(matches!(
        app.request_capture().await,
        Err(CaptureError::ControllerGone)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_preview_is_largest_size_within_limit() {
    let dir = tempfile::tempdir().unwrap();
    let platform = VirtualPlatform::new(vec![
        VirtualCameraSpec::new("0", CameraFacing::Back, Resolution::new(64, 48))
            .with_preview_sizes(vec![
                Resolution::new(320, 240),
                Resolution::new(1280, 720),
                Resolution::new(2560, 1440),
            ]),
    ])
    .with_open_delay(Duration::from_millis(10));
    let (app, _notifications) = start(&platform, config_for(dir.path())).await;
    open(&app).await;

    let config = app.controller().active_config().unwrap();
    assert_eq!(config.preview_size, Resolution::new(1280, 720));
    assert_eq!(config.still_size, Resolution::new(64, 48));
    app.shutdown().await;
}
