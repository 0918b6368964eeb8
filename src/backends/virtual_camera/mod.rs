// SPDX-License-Identifier: GPL-3.0-only

//! Software camera platform
//!
//! Behaves like a hardware camera stack without any hardware: opening and
//! configuring complete asynchronously on worker threads, and still requests
//! produce real JPEG frames rendered from a test pattern. Faults (permission
//! denial, disconnects, lost or corrupt frames) can be injected so the
//! controller and the burst pipeline can be exercised end to end.
//!
//! # Architecture
//!
//! ```text
//! open_device ──► worker thread ──► DeviceCallback::on_opened(VirtualDevice)
//! create_capture_session ──► worker ──► SessionCallback::on_configured(VirtualSession)
//! capture_burst ──► frame thread ──► ImageSurface::queue_image (one per request)
//! ```

use crate::backends::camera::types::{
    BackendError, BackendResult, CameraCharacteristics, CameraFacing, CaptureRequest,
    CaptureRequestBatch, CaptureToken, OutputFormat, Resolution, StreamConfigurationMap,
};
use crate::backends::camera::{
    CameraDevice, CameraPlatform, CaptureSession, DeviceCallback, ImageSurface, SessionCallback,
    SessionOutputs,
};
use crate::constants::virtual_camera as defaults;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One simulated camera
#[derive(Debug, Clone)]
pub struct VirtualCameraSpec {
    pub id: String,
    pub facing: Option<CameraFacing>,
    pub jpeg_sizes: Vec<Resolution>,
    pub preview_sizes: Vec<Resolution>,
    /// When false the camera reports no stream configuration map
    pub has_capabilities: bool,
}

impl VirtualCameraSpec {
    pub fn new(id: impl Into<String>, facing: CameraFacing, still: Resolution) -> Self {
        Self {
            id: id.into(),
            facing: Some(facing),
            jpeg_sizes: vec![Resolution::new(still.width / 2, still.height / 2), still],
            preview_sizes: vec![still],
            has_capabilities: true,
        }
    }

    pub fn with_preview_sizes(mut self, sizes: Vec<Resolution>) -> Self {
        self.preview_sizes = sizes;
        self
    }

    pub fn without_capabilities(mut self) -> Self {
        self.has_capabilities = false;
        self
    }

    fn characteristics(&self) -> CameraCharacteristics {
        let stream_configuration = self.has_capabilities.then(|| {
            StreamConfigurationMap::new()
                .with_sizes(OutputFormat::Jpeg, self.jpeg_sizes.clone())
                .with_sizes(OutputFormat::Preview, self.preview_sizes.clone())
        });
        CameraCharacteristics {
            facing: self.facing,
            stream_configuration,
        }
    }
}

/// How an open attempt fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailure {
    /// `open_device` returns `PermissionDenied` synchronously
    PermissionDenied,
    /// The device reports disconnected instead of opened
    Disconnect,
    /// The device reports an error code instead of opened
    Error(i32),
}

#[derive(Debug, Clone)]
struct Behaviour {
    open_delay: Duration,
    configure_delay: Duration,
    frame_interval: Duration,
    delivery_limit: Option<usize>,
    corrupt_frames: Vec<usize>,
    reverse_delivery: bool,
    open_failure: Option<OpenFailure>,
    configure_failure: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            open_delay: defaults::OPEN_DELAY,
            configure_delay: defaults::CONFIGURE_DELAY,
            frame_interval: defaults::FRAME_INTERVAL,
            delivery_limit: None,
            corrupt_frames: Vec::new(),
            reverse_delivery: false,
            open_failure: None,
            configure_failure: false,
        }
    }
}

struct ActiveDevice {
    closed: Arc<AtomicBool>,
    callback: DeviceCallback,
}

struct PlatformShared {
    cameras: Vec<VirtualCameraSpec>,
    behaviour: Mutex<Behaviour>,
    open_count: AtomicUsize,
    devices_open: AtomicUsize,
    max_devices_open: AtomicUsize,
    active: Mutex<Option<ActiveDevice>>,
}

impl PlatformShared {
    fn behaviour(&self) -> Behaviour {
        self.behaviour
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    fn device_released(&self) {
        self.devices_open.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Software [`CameraPlatform`]; clones share the same simulated hardware
#[derive(Clone)]
pub struct VirtualPlatform {
    shared: Arc<PlatformShared>,
}

impl Default for VirtualPlatform {
    /// A back camera "0" and a front camera "1"
    fn default() -> Self {
        let (bw, bh) = defaults::BACK_STILL;
        let (fw, fh) = defaults::FRONT_STILL;
        Self::new(vec![
            VirtualCameraSpec::new("0", CameraFacing::Back, Resolution::new(bw, bh)),
            VirtualCameraSpec::new("1", CameraFacing::Front, Resolution::new(fw, fh)),
        ])
    }
}

impl VirtualPlatform {
    pub fn new(cameras: Vec<VirtualCameraSpec>) -> Self {
        info!(cameras = cameras.len(), "Creating virtual camera platform");
        Self {
            shared: Arc::new(PlatformShared {
                cameras,
                behaviour: Mutex::new(Behaviour::default()),
                open_count: AtomicUsize::new(0),
                devices_open: AtomicUsize::new(0),
                max_devices_open: AtomicUsize::new(0),
                active: Mutex::new(None),
            }),
        }
    }

    fn update(self, f: impl FnOnce(&mut Behaviour)) -> Self {
        if let Ok(mut behaviour) = self.shared.behaviour.lock() {
            f(&mut behaviour);
        }
        self
    }

    pub fn with_open_delay(self, delay: Duration) -> Self {
        self.update(|b| b.open_delay = delay)
    }

    pub fn with_frame_interval(self, interval: Duration) -> Self {
        self.update(|b| b.frame_interval = interval)
    }

    /// Deliver at most `limit` frames per burst; the rest are lost
    pub fn with_delivery_limit(self, limit: usize) -> Self {
        self.update(|b| b.delivery_limit = Some(limit))
    }

    /// Frames at these capture indices carry bytes that are not a JPEG
    pub fn with_corrupt_frames(self, indices: Vec<usize>) -> Self {
        self.update(|b| b.corrupt_frames = indices)
    }

    /// Deliver burst frames last-to-first
    pub fn with_reverse_delivery(self) -> Self {
        self.update(|b| b.reverse_delivery = true)
    }

    pub fn with_open_failure(self, failure: OpenFailure) -> Self {
        self.update(|b| b.open_failure = Some(failure))
    }

    pub fn with_configure_failure(self) -> Self {
        self.update(|b| b.configure_failure = true)
    }

    /// Remove any injected open failure
    pub fn clear_open_failure(&self) {
        if let Ok(mut behaviour) = self.shared.behaviour.lock() {
            behaviour.open_failure = None;
        }
    }

    /// Change the delay before each still for bursts submitted from now on
    pub fn set_frame_interval(&self, interval: Duration) {
        if let Ok(mut behaviour) = self.shared.behaviour.lock() {
            behaviour.frame_interval = interval;
        }
    }

    /// Times `open_device` started an open
    pub fn open_count(&self) -> usize {
        self.shared.open_count.load(Ordering::Acquire)
    }

    /// Devices opened or being opened and not yet closed
    pub fn devices_open(&self) -> usize {
        self.shared.devices_open.load(Ordering::Acquire)
    }

    /// Highest value `devices_open` ever reached
    pub fn max_concurrent_opens(&self) -> usize {
        self.shared.max_devices_open.load(Ordering::Acquire)
    }

    /// Report the currently open device as disconnected
    ///
    /// Returns false when no device is open.
    pub fn disconnect_active(&self) -> bool {
        let callback = match self.shared.active.lock() {
            Ok(active) => active
                .as_ref()
                .filter(|device| !device.closed.load(Ordering::Acquire))
                .map(|device| device.callback.clone()),
            Err(_) => None,
        };
        match callback {
            Some(callback) => {
                info!("Simulating camera disconnect");
                callback.on_disconnected();
                true
            }
            None => false,
        }
    }

    fn spec(&self, id: &str) -> Option<&VirtualCameraSpec> {
        self.shared.cameras.iter().find(|camera| camera.id == id)
    }
}

impl std::fmt::Debug for VirtualPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualPlatform")
            .field("cameras", &self.shared.cameras)
            .field("devices_open", &self.devices_open())
            .finish()
    }
}

fn spawn_worker(name: String, work: impl FnOnce() + Send + 'static) -> BackendResult<()> {
    thread::Builder::new()
        .name(name)
        .spawn(work)
        .map(|_| ())
        .map_err(|e| BackendError::Other(format!("failed to spawn worker: {}", e)))
}

impl CameraPlatform for VirtualPlatform {
    fn camera_ids(&self) -> BackendResult<Vec<String>> {
        Ok(self.shared.cameras.iter().map(|c| c.id.clone()).collect())
    }

    fn characteristics(&self, id: &str) -> BackendResult<CameraCharacteristics> {
        self.spec(id)
            .map(VirtualCameraSpec::characteristics)
            .ok_or_else(|| BackendError::DeviceNotFound(id.to_string()))
    }

    fn open_device(&self, id: &str, callback: DeviceCallback) -> BackendResult<()> {
        if self.spec(id).is_none() {
            return Err(BackendError::DeviceNotFound(id.to_string()));
        }
        let behaviour = self.shared.behaviour();
        if behaviour.open_failure == Some(OpenFailure::PermissionDenied) {
            return Err(BackendError::PermissionDenied);
        }

        self.shared.open_count.fetch_add(1, Ordering::AcqRel);
        let open = self.shared.devices_open.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.max_devices_open.fetch_max(open, Ordering::AcqRel);
        debug!(camera = id, open, "Opening virtual camera");

        let shared = Arc::clone(&self.shared);
        let id = id.to_string();
        spawn_worker(format!("virtual-open-{}", id), move || {
            thread::sleep(behaviour.open_delay);
            match behaviour.open_failure {
                Some(OpenFailure::Disconnect) => {
                    shared.device_released();
                    callback.on_disconnected();
                }
                Some(OpenFailure::Error(code)) => {
                    shared.device_released();
                    callback.on_error(code);
                }
                _ => {
                    let closed = Arc::new(AtomicBool::new(false));
                    if let Ok(mut active) = shared.active.lock() {
                        *active = Some(ActiveDevice {
                            closed: Arc::clone(&closed),
                            callback: callback.clone(),
                        });
                    }
                    callback.on_opened(Box::new(VirtualDevice {
                        id,
                        shared,
                        closed,
                    }));
                }
            }
        })
        .inspect_err(|_| self.shared.device_released())
    }
}

/// An open virtual camera
pub struct VirtualDevice {
    id: String,
    shared: Arc<PlatformShared>,
    closed: Arc<AtomicBool>,
}

impl CameraDevice for VirtualDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_capture_session(
        &mut self,
        outputs: SessionOutputs,
        callback: SessionCallback,
    ) -> BackendResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::DeviceClosed);
        }

        let behaviour = self.shared.behaviour();
        let shared = Arc::clone(&self.shared);
        let device_closed = Arc::clone(&self.closed);
        spawn_worker(format!("virtual-configure-{}", self.id), move || {
            thread::sleep(behaviour.configure_delay);
            if behaviour.configure_failure {
                callback.on_configure_failed();
                return;
            }
            callback.on_configured(Box::new(VirtualSession {
                still: outputs.still,
                shared,
                device_closed,
                closed: Arc::new(AtomicBool::new(false)),
                repeating: Mutex::new(None),
            }));
        })
    }

    fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.device_released();
        if let Ok(mut active) = self.shared.active.lock()
            && active
                .as_ref()
                .is_some_and(|device| Arc::ptr_eq(&device.closed, &self.closed))
        {
            active.take();
        }
        debug!(camera = %self.id, "Virtual camera closed");
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// A configured virtual capture session
pub struct VirtualSession {
    still: ImageSurface,
    shared: Arc<PlatformShared>,
    device_closed: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    repeating: Mutex<Option<CaptureRequest>>,
}

impl VirtualSession {
    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.device_closed.load(Ordering::Acquire)
    }
}

impl CaptureSession for VirtualSession {
    fn set_repeating_request(&self, request: CaptureRequest) -> BackendResult<()> {
        if !self.is_live() {
            return Err(BackendError::SessionClosed);
        }
        debug!(preview = %request.target_size, "Repeating preview request installed");
        if let Ok(mut repeating) = self.repeating.lock() {
            *repeating = Some(request);
        }
        Ok(())
    }

    fn capture_burst(&self, batch: &CaptureRequestBatch) -> BackendResult<()> {
        if !self.is_live() {
            return Err(BackendError::SessionClosed);
        }

        let behaviour = self.shared.behaviour();
        let mut tokens: Vec<(CaptureToken, Resolution)> = batch
            .requests()
            .iter()
            .filter_map(|request| request.token.map(|token| (token, request.target_size)))
            .collect();
        if let Some(limit) = behaviour.delivery_limit {
            tokens.truncate(limit);
        }
        if behaviour.reverse_delivery {
            tokens.reverse();
        }

        let surface = self.still.clone();
        let closed = Arc::clone(&self.closed);
        let device_closed = Arc::clone(&self.device_closed);
        debug!(batch = batch.id(), requests = batch.len(), delivering = tokens.len(), "Virtual burst started");

        spawn_worker(format!("virtual-burst-{}", batch.id()), move || {
            for (token, size) in tokens {
                thread::sleep(behaviour.frame_interval);
                if closed.load(Ordering::Acquire) || device_closed.load(Ordering::Acquire) {
                    debug!(batch = token.batch, "Session closed, abandoning burst");
                    return;
                }

                let bytes = if behaviour.corrupt_frames.contains(&token.index) {
                    b"corrupt frame".to_vec()
                } else {
                    match render_frame(size, token.index) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!(index = token.index, error = %e, "Failed to render test frame");
                            continue;
                        }
                    }
                };

                match surface.queue_image(token, bytes) {
                    Ok(()) => {}
                    Err(BackendError::ReaderClosed) => return,
                    Err(e) => warn!(index = token.index, error = %e, "Frame dropped"),
                }
            }
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Virtual session closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Render the test pattern as a JPEG
///
/// The top-left quadrant is solid red and the rest a grey ramp that varies
/// with `index`, so orientation and frame identity survive re-encoding.
pub fn render_frame(size: Resolution, index: usize) -> Result<Vec<u8>, String> {
    let (width, height) = (size.width.max(2), size.height.max(2));
    let shade = (index * 20 % 200) as u8;
    let pattern = RgbImage::from_fn(width, height, |x, y| {
        if x < width / 2 && y < height / 2 {
            Rgb([230, 20, 20])
        } else {
            let ramp = ((x + y) * 40 / (width + height)) as u8;
            Rgb([shade + ramp, shade + ramp, shade + ramp])
        }
    });

    let mut buffer = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, defaults::FRAME_QUALITY)
        .encode(
            pattern.as_raw(),
            width,
            height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| format!("JPEG encoding failed: {}", e))?;
    Ok(buffer)
}
