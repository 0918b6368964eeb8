// SPDX-License-Identifier: GPL-3.0-only

//! Capture session lifecycle controller
//!
//! The controller is a single task that owns the open device, the capture
//! session and the image reader. UI commands and platform callbacks reach it
//! through one channel, so state transitions never race:
//!
//! ```text
//! Idle → Configuring → Opening → DeviceReady → SessionConfiguring → SessionReady
//!   ▲                                                                    │
//!   └──────────────── Closing ◄──────── Error(reason) ◄──────────────────┘
//! ```
//!
//! Lifecycle commands that arrive mid-transition are deferred and replayed
//! once the controller is back in `Idle` or `SessionReady`. Capture requests
//! are never deferred.

use super::catalog::{DeviceCatalog, SessionConfig};
use super::image_reader::ImageReader;
use super::types::{
    BackendError, CameraFacing, CaptureRequest, DisplayRotation, PreviewSurface, Resolution,
};
use super::{
    CameraDevice, CameraPlatform, CaptureSession, DeviceCallback, EventSink, PlatformEvent,
    SessionCallback, SessionOutputs,
};
use crate::constants;
use crate::errors::CaptureError;
use crate::notifications::{Notification, Notifier};
use crate::pipelines::photo::{BurstCoordinator, BurstReport, OrientationContext, PendingBurst};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Why a session ended in an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    PermissionDenied,
    Disconnected,
    DeviceError(i32),
    ConfigureFailed,
    Backend(String),
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionFailure::PermissionDenied => write!(f, "camera permission denied"),
            SessionFailure::Disconnected => write!(f, "device disconnected"),
            SessionFailure::DeviceError(code) => write!(f, "device error {}", code),
            SessionFailure::ConfigureFailed => write!(f, "session configuration failed"),
            SessionFailure::Backend(msg) => write!(f, "{}", msg),
        }
    }
}

/// Lifecycle state of the camera
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Configuring,
    Opening,
    DeviceReady,
    SessionConfiguring,
    SessionReady,
    Closing,
    Error(SessionFailure),
}

impl SessionState {
    /// States in which lifecycle commands are deferred
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            SessionState::Configuring
                | SessionState::Opening
                | SessionState::DeviceReady
                | SessionState::SessionConfiguring
                | SessionState::Closing
        )
    }

    /// Capture requests are only accepted here
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::SessionReady)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Configuring => write!(f, "Configuring"),
            SessionState::Opening => write!(f, "Opening"),
            SessionState::DeviceReady => write!(f, "DeviceReady"),
            SessionState::SessionConfiguring => write!(f, "SessionConfiguring"),
            SessionState::SessionReady => write!(f, "SessionReady"),
            SessionState::Closing => write!(f, "Closing"),
            SessionState::Error(reason) => write!(f, "Error({})", reason),
        }
    }
}

/// One observed state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Controller tuning
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub prefer_front: bool,
    pub permission_granted: bool,
    pub reader_capacity: usize,
    pub max_preview: Resolution,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            prefer_front: false,
            permission_granted: true,
            reader_capacity: constants::IMAGE_READER_CAPACITY,
            max_preview: Resolution::new(
                constants::capture::MAX_PREVIEW_WIDTH,
                constants::capture::MAX_PREVIEW_HEIGHT,
            ),
        }
    }
}

enum Command {
    SurfaceAvailable(Resolution),
    SurfaceDestroyed,
    SwitchFacing,
    Pause,
    Resume,
    PermissionChanged(bool),
    DisplayRotationChanged(DisplayRotation),
    Capture {
        count: usize,
        reply: oneshot::Sender<Result<PendingBurst, CaptureError>>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::SurfaceAvailable(_) => "surface_available",
            Command::SurfaceDestroyed => "surface_destroyed",
            Command::SwitchFacing => "switch_facing",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::PermissionChanged(_) => "permission_changed",
            Command::DisplayRotationChanged(_) => "display_rotation_changed",
            Command::Capture { .. } => "capture",
        }
    }
}

enum ControllerInput {
    Command(Command),
    Platform(PlatformEvent),
    Shutdown(oneshot::Sender<()>),
}

/// Close whatever resource a discarded event carries
fn discard(event: PlatformEvent) {
    match event {
        PlatformEvent::DeviceOpened { mut device, .. } => {
            debug!(camera = device.id(), "Closing device from a stale open");
            device.close();
        }
        PlatformEvent::SessionConfigured { session, .. } => {
            debug!("Closing session from a stale configure");
            session.close();
        }
        _ => {}
    }
}

/// Owns the device, session and image reader
pub struct CaptureSessionController {
    platform: Arc<dyn CameraPlatform>,
    settings: ControllerSettings,
    coordinator: BurstCoordinator,
    notifier: Notifier,

    facing: CameraFacing,
    permission_granted: bool,
    paused: bool,
    surface: Option<Resolution>,
    display_rotation: DisplayRotation,

    /// Bumped on every open attempt and every close
    generation: u64,
    config: Option<SessionConfig>,
    device: Option<Box<dyn CameraDevice>>,
    session: Option<Box<dyn CaptureSession>>,
    reader: Option<ImageReader>,

    deferred: VecDeque<Command>,
    inputs: mpsc::UnboundedReceiver<ControllerInput>,
    self_tx: mpsc::WeakUnboundedSender<ControllerInput>,
    state_tx: watch::Sender<SessionState>,
    transitions: broadcast::Sender<StateTransition>,
    config_tx: watch::Sender<Option<SessionConfig>>,
}

impl CaptureSessionController {
    /// Start the controller task
    ///
    /// Must be called from within a tokio runtime. The controller stops when
    /// [`ControllerHandle::shutdown`] is called or every handle is dropped.
    pub fn spawn(
        platform: Arc<dyn CameraPlatform>,
        settings: ControllerSettings,
        coordinator: BurstCoordinator,
        notifier: Notifier,
    ) -> ControllerHandle {
        let (tx, inputs) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (transitions, _) = broadcast::channel(constants::capture::TRANSITION_CHANNEL_CAPACITY);
        let (config_tx, config_rx) = watch::channel(None);

        let controller = Self {
            platform,
            facing: CameraFacing::from_prefer_front(settings.prefer_front),
            permission_granted: settings.permission_granted,
            settings,
            coordinator,
            notifier,
            paused: false,
            surface: None,
            display_rotation: DisplayRotation::default(),
            generation: 0,
            config: None,
            device: None,
            session: None,
            reader: None,
            deferred: VecDeque::new(),
            inputs,
            self_tx: tx.downgrade(),
            state_tx,
            transitions: transitions.clone(),
            config_tx,
        };

        tokio::spawn(controller.run());

        ControllerHandle {
            tx,
            state: state_rx,
            transitions,
            config: config_rx,
        }
    }

    async fn run(mut self) {
        info!(facing = %self.facing, "Capture session controller started");

        while let Some(input) = self.inputs.recv().await {
            match input {
                ControllerInput::Command(command) => self.handle_command(command),
                ControllerInput::Platform(event) => self.handle_event(event),
                ControllerInput::Shutdown(reply) => {
                    self.close();
                    self.deferred.clear();
                    let _ = reply.send(());
                    break;
                }
            }
            self.replay_deferred();
        }

        self.close();
        info!("Capture session controller stopped");
    }

    fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    fn set_state(&mut self, next: SessionState) {
        let previous = self.state_tx.send_replace(next.clone());
        if previous == next {
            return;
        }
        debug!(from = %previous, to = %next, "State transition");
        let _ = self.transitions.send(StateTransition {
            from: previous,
            to: next,
        });
    }

    fn event_sink(&self) -> EventSink {
        let tx = self.self_tx.clone();
        Arc::new(move |event| {
            let Some(tx) = tx.upgrade() else {
                discard(event);
                return;
            };
            if let Err(mpsc::error::SendError(ControllerInput::Platform(event))) =
                tx.send(ControllerInput::Platform(event))
            {
                discard(event);
            }
        })
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Capture { count, reply } => {
                let _ = reply.send(self.start_capture(count));
            }
            Command::DisplayRotationChanged(rotation) => {
                debug!(%rotation, "Display rotation changed");
                self.display_rotation = rotation;
            }
            command if self.state().is_transitioning() => {
                debug!(command = command.name(), state = %self.state(), "Deferring command");
                self.deferred.push_back(command);
            }
            command => self.apply(command),
        }
    }

    fn replay_deferred(&mut self) {
        while !self.state().is_transitioning() {
            let Some(command) = self.deferred.pop_front() else {
                break;
            };
            debug!(command = command.name(), "Replaying deferred command");
            self.handle_command(command);
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::SurfaceAvailable(size) => {
                let changed = self.surface != Some(size);
                self.surface = Some(size);
                info!(%size, "Preview surface available");
                if self.state().is_ready() && changed {
                    info!("Surface size changed, reconfiguring");
                    self.close();
                }
                self.try_configure();
            }
            Command::SurfaceDestroyed => {
                info!("Preview surface destroyed");
                self.surface = None;
                self.close();
            }
            Command::SwitchFacing => {
                self.facing = self.facing.flipped();
                info!(facing = %self.facing, "Switching camera");
                self.close();
                self.try_configure();
            }
            Command::Pause => {
                info!("Pausing camera");
                self.paused = true;
                self.close();
            }
            Command::Resume => {
                info!("Resuming camera");
                self.paused = false;
                self.try_configure();
            }
            Command::PermissionChanged(granted) => {
                info!(granted, "Camera permission changed");
                self.permission_granted = granted;
                if granted {
                    self.try_configure();
                } else {
                    self.close();
                    self.notifier.notify(Notification::PermissionDenied);
                }
            }
            Command::DisplayRotationChanged(_) | Command::Capture { .. } => {
                self.handle_command(command);
            }
        }
    }

    /// Select a device and start opening it when everything is in place
    fn try_configure(&mut self) {
        if self.state() != SessionState::Idle {
            return;
        }
        let Some(surface) = self.surface else {
            debug!("No preview surface, not opening camera");
            return;
        };
        if self.paused {
            debug!("Paused, not opening camera");
            return;
        }
        if !self.permission_granted {
            warn!("Camera permission missing, not opening camera");
            self.notifier.notify(Notification::PermissionDenied);
            return;
        }

        self.set_state(SessionState::Configuring);

        let catalog = DeviceCatalog::new(self.platform.as_ref());
        let negotiated = catalog
            .select_device(self.facing.is_front())
            .and_then(|descriptor| {
                SessionConfig::negotiate(&catalog, &descriptor, surface, self.settings.max_preview)
            });
        let config = match negotiated {
            Ok(config) => config,
            Err(e) => {
                error!(facing = %self.facing, error = %e, "No usable camera");
                self.notifier.notify(Notification::CameraUnavailable);
                self.set_state(SessionState::Idle);
                return;
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let device_id = config.device_id.clone();
        self.config = Some(config);
        self.set_state(SessionState::Opening);
        info!(camera = %device_id, generation, "Opening camera");

        let callback = DeviceCallback::new(generation, self.event_sink());
        match self.platform.open_device(&device_id, callback) {
            Ok(()) => {}
            Err(BackendError::PermissionDenied) => {
                warn!(camera = %device_id, "Camera permission denied by platform");
                self.set_state(SessionState::Error(SessionFailure::PermissionDenied));
                self.notifier.notify(Notification::PermissionDenied);
                self.close();
            }
            Err(e) => self.fail(SessionFailure::Backend(e.to_string())),
        }
    }

    fn handle_event(&mut self, event: PlatformEvent) {
        if event.generation() != self.generation {
            debug!(?event, current = self.generation, "Discarding stale platform event");
            discard(event);
            return;
        }

        match event {
            PlatformEvent::DeviceOpened { device, .. } => {
                if self.state() == SessionState::Opening {
                    self.on_device_opened(device);
                } else {
                    discard(PlatformEvent::DeviceOpened {
                        generation: self.generation,
                        device,
                    });
                }
            }
            PlatformEvent::SessionConfigured { session, .. } => {
                if self.state() == SessionState::SessionConfiguring {
                    self.on_session_configured(session);
                } else {
                    session.close();
                }
            }
            PlatformEvent::DeviceDisconnected { .. } => self.fail(SessionFailure::Disconnected),
            PlatformEvent::DeviceError { code, .. } => self.fail(SessionFailure::DeviceError(code)),
            PlatformEvent::SessionConfigureFailed { .. } => {
                self.fail(SessionFailure::ConfigureFailed)
            }
        }
    }

    fn on_device_opened(&mut self, mut device: Box<dyn CameraDevice>) {
        info!(camera = device.id(), "Camera opened");
        self.set_state(SessionState::DeviceReady);

        let Some(config) = self.config.clone() else {
            device.close();
            self.fail(SessionFailure::Backend("no negotiated configuration".into()));
            return;
        };

        let reader = ImageReader::new(config.still_size, self.settings.reader_capacity);
        let outputs = SessionOutputs {
            preview: PreviewSurface::new(config.preview_size),
            still: reader.surface(),
        };
        let callback = SessionCallback::new(self.generation, self.event_sink());

        self.set_state(SessionState::SessionConfiguring);
        let result = device.create_capture_session(outputs, callback);
        self.device = Some(device);
        self.reader = Some(reader);

        if let Err(e) = result {
            self.fail(SessionFailure::Backend(e.to_string()));
        }
    }

    fn on_session_configured(&mut self, session: Box<dyn CaptureSession>) {
        let Some(config) = self.config.clone() else {
            session.close();
            self.fail(SessionFailure::Backend("no negotiated configuration".into()));
            return;
        };

        if let Err(e) = session.set_repeating_request(CaptureRequest::preview(config.preview_size)) {
            session.close();
            self.fail(SessionFailure::Backend(e.to_string()));
            return;
        }

        info!(
            camera = %config.device_id,
            preview = %config.preview_size,
            still = %config.still_size,
            "Capture session ready"
        );
        self.session = Some(session);
        self.config_tx.send_replace(Some(config));
        self.set_state(SessionState::SessionReady);
    }

    fn start_capture(&mut self, count: usize) -> Result<PendingBurst, CaptureError> {
        let state = self.state();
        if !state.is_ready() {
            warn!(%state, count, "Capture requested before session ready");
            self.notifier.notify(Notification::CameraNotReady);
            return Err(CaptureError::SessionNotReady(state));
        }

        let (Some(session), Some(reader), Some(config)) = (
            self.session.as_deref(),
            self.reader.as_ref(),
            self.config.as_ref(),
        ) else {
            return Err(CaptureError::SessionNotReady(state));
        };

        let ctx = OrientationContext::new(self.display_rotation, config.facing);
        self.coordinator
            .submit(count, session, reader, ctx, self.state_tx.subscribe())
    }

    /// Record the failure and tear everything down
    ///
    /// There is no automatic retry; the next lifecycle command starts over.
    fn fail(&mut self, reason: SessionFailure) {
        error!(%reason, state = %self.state(), "Camera session failed");
        self.set_state(SessionState::Error(reason));
        self.notifier.notify(Notification::CameraError);
        self.close();
    }

    /// Release session, device and reader in that order and return to Idle
    ///
    /// Closing an idle controller is a no-op.
    fn close(&mut self) {
        let idle = self.state() == SessionState::Idle;
        if idle && self.device.is_none() && self.session.is_none() && self.reader.is_none() {
            return;
        }

        self.set_state(SessionState::Closing);
        if let Some(session) = self.session.take() {
            session.close();
        }
        if let Some(mut device) = self.device.take() {
            device.close();
        }
        if let Some(reader) = self.reader.take() {
            reader.close();
        }
        self.config = None;
        self.generation += 1;
        self.config_tx.send_replace(None);
        self.set_state(SessionState::Idle);
        info!("Camera closed");
    }
}

/// Cloneable front end of the controller task
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ControllerInput>,
    state: watch::Receiver<SessionState>,
    transitions: broadcast::Sender<StateTransition>,
    config: watch::Receiver<Option<SessionConfig>>,
}

impl ControllerHandle {
    fn send(&self, command: Command) {
        let name = command.name();
        if self.tx.send(ControllerInput::Command(command)).is_err() {
            warn!(command = name, "Capture session controller is gone");
        }
    }

    pub fn surface_available(&self, width: u32, height: u32) {
        self.send(Command::SurfaceAvailable(Resolution::new(width, height)));
    }

    pub fn surface_destroyed(&self) {
        self.send(Command::SurfaceDestroyed);
    }

    pub fn switch_facing(&self) {
        self.send(Command::SwitchFacing);
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    pub fn set_permission(&self, granted: bool) {
        self.send(Command::PermissionChanged(granted));
    }

    pub fn set_display_rotation(&self, rotation: DisplayRotation) {
        self.send(Command::DisplayRotationChanged(rotation));
    }

    /// Take a single photo
    pub async fn capture(&self) -> Result<BurstReport, CaptureError> {
        self.capture_burst(1).await
    }

    /// Take `count` photos and wait until they are persisted
    pub async fn capture_burst(&self, count: usize) -> Result<BurstReport, CaptureError> {
        self.submit_burst(count).await?.wait().await
    }

    /// Submit a burst without waiting for its frames
    pub async fn submit_burst(&self, count: usize) -> Result<PendingBurst, CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControllerInput::Command(Command::Capture { count, reply }))
            .map_err(|_| CaptureError::ControllerGone)?;
        rx.await.map_err(|_| CaptureError::ControllerGone)?
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Every state change, in order
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    /// Configuration of the ready session, if any
    pub fn active_config(&self) -> Option<SessionConfig> {
        self.config.borrow().clone()
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_for_state(
        &self,
        predicate: impl Fn(&SessionState) -> bool,
    ) -> Result<SessionState, CaptureError> {
        let mut rx = self.state.clone();
        rx.wait_for(|state| predicate(state))
            .await
            .map(|state| state.clone())
            .map_err(|_| CaptureError::ControllerGone)
    }

    /// Close the camera and stop the controller task
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(ControllerInput::Shutdown(reply)).is_ok() {
            let _ = rx.await;
        }
    }
}

impl std::fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("state", &self.state())
            .finish()
    }
}
