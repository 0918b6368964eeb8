// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for camera capture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        CameraApp / CLI                       │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │ camera (traits,  │  │ virtual_camera  │  │
//! │  │ controller)      │◄─┤ (software       │  │
//! │  │                  │  │  platform)      │  │
//! │  └──────────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────────┘
//! ```

pub mod camera;
pub mod virtual_camera;
