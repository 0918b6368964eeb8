// SPDX-License-Identifier: MPL-2.0

//! Burst Camera - camera session control with burst capture
//!
//! This library drives a camera through its open/configure/close lifecycle,
//! takes single photos and 10-shot bursts, and saves every frame as an
//! upright JPEG without blocking the preview.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`app`]: Facade wiring everything together for a UI
//! - [`backends`]: Camera platform traits, session controller and a software camera
//! - [`pipelines`]: Burst coordination and photo post-processing
//! - [`storage`]: Two-phase photo writes and the latest-photo registry
//! - [`config`]: User configuration handling
//! - [`notifications`]: Short user-facing messages

pub mod app;
pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod notifications;
pub mod pipelines;
pub mod storage;

// Re-export commonly used types
pub use app::CameraApp;
pub use backends::camera::{CameraFacing, ControllerHandle, SessionState};
pub use backends::virtual_camera::VirtualPlatform;
pub use config::Config;
pub use errors::{AppError, AppResult, CaptureError};
pub use notifications::Notification;
pub use pipelines::photo::BurstReport;
