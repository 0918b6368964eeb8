// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Taking single photos and bursts
//! - An interactive session driving the full lifecycle
//!
//! All commands run against the software camera platform.

use burst_camera::backends::camera::{CameraPlatform, DeviceCatalog, SessionState};
use burst_camera::{AppError, AppResult, BurstReport, CameraApp, CaptureError, Config, VirtualPlatform};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

/// How long to wait for the camera to open
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

fn runtime() -> AppResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::Other(format!("Failed to start async runtime: {}", e)))
}

/// List all available cameras
pub fn list_cameras() -> AppResult<()> {
    let platform = VirtualPlatform::default();
    let catalog = DeviceCatalog::new(&platform);
    let cameras = catalog.enumerate()?;

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for camera in &cameras {
        println!("  [{}] {} camera", camera.id, camera.facing);
        println!("      Max still: {}", camera.max_still_size);

        let previews = catalog.preview_sizes(&camera.id)?;
        if !previews.is_empty() {
            let sizes: Vec<String> = previews.iter().map(ToString::to_string).collect();
            println!("      Preview: {}", sizes.join(", "));
        }
        println!();
    }

    Ok(())
}

/// Take `count` photos (config burst count when `None`)
pub fn take_photos(
    count: Option<usize>,
    front: bool,
    output: Option<PathBuf>,
) -> AppResult<()> {
    runtime()?.block_on(capture(count, front, output))
}

async fn capture(
    count: Option<usize>,
    front: bool,
    output: Option<PathBuf>,
) -> AppResult<()> {
    let mut config = Config::load();
    config.prefer_front_camera |= front;
    if let Some(dir) = output {
        config.photo_dir = Some(dir);
    }
    let count = count.unwrap_or(config.burst_count);
    let surface = config.max_preview;

    let platform: Arc<dyn CameraPlatform> = Arc::new(VirtualPlatform::default());
    let (app, mut notifications) = CameraApp::start(config, platform).await;
    app.on_surface_available(surface.width, surface.height);

    let ready = tokio::time::timeout(
        OPEN_TIMEOUT,
        app.controller().wait_for_state(SessionState::is_ready),
    )
    .await;
    if !matches!(ready, Ok(Ok(_))) {
        while let Ok(notification) = notifications.try_recv() {
            eprintln!("{}", notification);
        }
        app.shutdown().await;
        return Err("Camera did not become ready".into());
    }

    println!("Capturing {} photo(s)...", count);
    let result = app.controller().capture_burst(count).await;

    while let Ok(notification) = notifications.try_recv() {
        println!("{}", notification);
    }
    app.shutdown().await;

    match result {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(CaptureError::PartialBurst { report, .. }) => {
            print_report(&report);
            Err(format!(
                "Only {} of {} photos were captured",
                report.delivered, report.expected
            )
            .into())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_report(report: &BurstReport) {
    for image in &report.persisted {
        println!("Saved: {}", image.path.display());
    }
    for failure in &report.failures {
        eprintln!("Failed photo {}: {}", failure.index + 1, failure.reason);
    }
}

/// Interactive session reading commands from stdin
pub fn run_interactive(front: bool) -> AppResult<()> {
    runtime()?.block_on(interactive(front))
}

async fn interactive(front: bool) -> AppResult<()> {
    let mut config = Config::load();
    config.prefer_front_camera |= front;
    let surface = config.max_preview;

    let platform: Arc<dyn CameraPlatform> = Arc::new(VirtualPlatform::default());
    let (app, mut notifications) = CameraApp::start(config, platform).await;

    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            println!("» {}", notification);
        }
    });
    let mut transitions = app.controller().subscribe_transitions();
    tokio::spawn(async move {
        while let Ok(transition) = transitions.recv().await {
            println!("  [{} → {}]", transition.from, transition.to);
        }
    });

    println!("Photos are saved to {}", app.photos_dir().display());
    println!("Commands: capture, burst, switch, pause, resume, rotate <deg>, latest, quit");
    app.on_surface_available(surface.width, surface.height);

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                line.map_err(|e| AppError::Other(format!("Failed to read command: {}", e)))?
            }
        };
        let Some(line) = line else { break };

        let mut words = line.split_whitespace();
        match words.next() {
            Some("c" | "capture") => report_result(app.request_capture().await),
            Some("b" | "burst") => report_result(app.request_burst().await),
            Some("s" | "switch") => app.request_facing_switch(),
            Some("p" | "pause") => app.pause(),
            Some("r" | "resume") => app.resume(),
            Some("rotate") => match words.next().and_then(|d| d.parse::<i32>().ok()) {
                Some(degrees) => app.on_display_rotation(degrees),
                None => println!("Usage: rotate <0|90|180|270>"),
            },
            Some("l" | "latest") => {
                if let Some(image) = app.latest_image() {
                    println!("Latest: {}", image.path.display());
                }
            }
            Some("q" | "quit") => break,
            Some(other) => println!("Unknown command: {}", other),
            None => {}
        }
    }

    app.shutdown().await;
    Ok(())
}

fn report_result(result: Result<BurstReport, CaptureError>) {
    match result {
        Ok(report) => print_report(&report),
        Err(CaptureError::PartialBurst { report, .. }) => print_report(&report),
        Err(e) => eprintln!("{}", e),
    }
}
