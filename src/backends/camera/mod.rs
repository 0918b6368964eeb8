// SPDX-License-Identifier: MPL-2.0

//! Camera backend abstraction
//!
//! The hardware platform is reached through three traits that mirror the
//! lifetime of the objects they describe:
//!
//! ```text
//! ┌─────────────────────────┐
//! │ CaptureSessionController│  ← Owns device, session and image reader
//! └──────────┬──────────────┘
//!            │ open_device / create_capture_session
//!            ▼
//! ┌─────────────────────────┐        PlatformEvent
//! │  CameraPlatform         │ ─────────────────────────┐
//! │   └─ CameraDevice       │                          │
//! │       └─ CaptureSession │                          ▼
//! └─────────────────────────┘               single controller channel
//! ```
//!
//! Opening a device and configuring a session are asynchronous: the call
//! returns at once and the outcome is reported later through the callback
//! object passed in. Callbacks are collapsed into one tagged [`PlatformEvent`]
//! so the controller has exactly one place where transitions happen.

pub mod catalog;
pub mod image_reader;
pub mod manager;
pub mod types;

pub use catalog::{DeviceCatalog, SessionConfig};
pub use image_reader::{Image, ImageReader, ImageSurface, ListenerRegistration};
pub use manager::{
    CaptureSessionController, ControllerHandle, ControllerSettings, SessionFailure, SessionState,
    StateTransition,
};
pub use types::*;

use std::sync::Arc;

/// Entry point into a camera platform
pub trait CameraPlatform: Send + Sync {
    /// Ids of every camera the platform exposes, in platform order
    fn camera_ids(&self) -> BackendResult<Vec<String>>;

    /// Static characteristics of one camera
    fn characteristics(&self, id: &str) -> BackendResult<CameraCharacteristics>;

    /// Start opening a camera
    ///
    /// Returns once the request is issued. `Err(BackendError::PermissionDenied)`
    /// is returned synchronously when the camera permission is missing; every
    /// other outcome is delivered through `callback`.
    fn open_device(&self, id: &str, callback: DeviceCallback) -> BackendResult<()>;
}

/// An open camera device
pub trait CameraDevice: Send {
    fn id(&self) -> &str;

    /// Start configuring a session bound to `outputs`
    ///
    /// The outcome is delivered through `callback`.
    fn create_capture_session(
        &mut self,
        outputs: SessionOutputs,
        callback: SessionCallback,
    ) -> BackendResult<()>;

    /// Close the device. Closing twice is a no-op.
    fn close(&mut self);
}

/// A configured capture session
pub trait CaptureSession: Send + Sync {
    /// Install the request repeated for the live preview
    fn set_repeating_request(&self, request: CaptureRequest) -> BackendResult<()>;

    /// Submit an ordered batch of still requests
    ///
    /// Images for the batch arrive at the session's image reader in
    /// submission order.
    fn capture_burst(&self, batch: &CaptureRequestBatch) -> BackendResult<()>;

    /// Close the session, invalidating outstanding requests. Closing twice is a no-op.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// The two outputs every session is bound to
#[derive(Debug, Clone)]
pub struct SessionOutputs {
    pub preview: PreviewSurface,
    pub still: ImageSurface,
}

/// Asynchronous platform notification
///
/// `generation` identifies the open attempt the event belongs to so events
/// from a device that has since been torn down can be recognised.
pub enum PlatformEvent {
    DeviceOpened {
        generation: u64,
        device: Box<dyn CameraDevice>,
    },
    DeviceDisconnected {
        generation: u64,
    },
    DeviceError {
        generation: u64,
        code: i32,
    },
    SessionConfigured {
        generation: u64,
        session: Box<dyn CaptureSession>,
    },
    SessionConfigureFailed {
        generation: u64,
    },
}

impl PlatformEvent {
    pub fn generation(&self) -> u64 {
        match self {
            PlatformEvent::DeviceOpened { generation, .. }
            | PlatformEvent::DeviceDisconnected { generation }
            | PlatformEvent::DeviceError { generation, .. }
            | PlatformEvent::SessionConfigured { generation, .. }
            | PlatformEvent::SessionConfigureFailed { generation } => *generation,
        }
    }
}

impl std::fmt::Debug for PlatformEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformEvent::DeviceOpened { generation, device } => f
                .debug_struct("DeviceOpened")
                .field("generation", generation)
                .field("device", &device.id())
                .finish(),
            PlatformEvent::DeviceDisconnected { generation } => f
                .debug_struct("DeviceDisconnected")
                .field("generation", generation)
                .finish(),
            PlatformEvent::DeviceError { generation, code } => f
                .debug_struct("DeviceError")
                .field("generation", generation)
                .field("code", code)
                .finish(),
            PlatformEvent::SessionConfigured { generation, .. } => f
                .debug_struct("SessionConfigured")
                .field("generation", generation)
                .finish(),
            PlatformEvent::SessionConfigureFailed { generation } => f
                .debug_struct("SessionConfigureFailed")
                .field("generation", generation)
                .finish(),
        }
    }
}

/// Destination for platform events
pub type EventSink = Arc<dyn Fn(PlatformEvent) + Send + Sync>;

/// Device state callback handed to [`CameraPlatform::open_device`]
#[derive(Clone)]
pub struct DeviceCallback {
    generation: u64,
    sink: EventSink,
}

impl DeviceCallback {
    pub fn new(generation: u64, sink: EventSink) -> Self {
        Self { generation, sink }
    }

    pub fn on_opened(&self, device: Box<dyn CameraDevice>) {
        (self.sink)(PlatformEvent::DeviceOpened {
            generation: self.generation,
            device,
        });
    }

    pub fn on_disconnected(&self) {
        (self.sink)(PlatformEvent::DeviceDisconnected {
            generation: self.generation,
        });
    }

    pub fn on_error(&self, code: i32) {
        (self.sink)(PlatformEvent::DeviceError {
            generation: self.generation,
            code,
        });
    }
}

/// Session state callback handed to [`CameraDevice::create_capture_session`]
#[derive(Clone)]
pub struct SessionCallback {
    generation: u64,
    sink: EventSink,
}

impl SessionCallback {
    pub fn new(generation: u64, sink: EventSink) -> Self {
        Self { generation, sink }
    }

    pub fn on_configured(&self, session: Box<dyn CaptureSession>) {
        (self.sink)(PlatformEvent::SessionConfigured {
            generation: self.generation,
            session,
        });
    }

    pub fn on_configure_failed(&self) {
        (self.sink)(PlatformEvent::SessionConfigureFailed {
            generation: self.generation,
        });
    }
}
