// SPDX-License-Identifier: GPL-3.0-only

//! Burst capture coordination
//!
//! A burst is submitted as one ordered batch of still requests. Frames are
//! picked up by the image-available listener, re-sequenced by capture index
//! and handed to the post-processor one by one. The burst ends when every
//! frame has arrived, the deadline passes, or the session stops being ready;
//! whatever arrived by then is still persisted and reported.

use super::processing::{OrientationContext, RawFrame};
use super::ImagePostProcessor;
use crate::backends::camera::manager::SessionState;
use crate::backends::camera::types::CaptureRequestBatch;
use crate::backends::camera::{CaptureSession, ImageReader, ListenerRegistration};
use crate::errors::CaptureError;
use crate::notifications::{Notification, Notifier};
use crate::storage::PersistedImage;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// A frame that arrived but could not be saved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFailure {
    pub index: usize,
    pub reason: String,
}

/// Outcome of one burst
#[derive(Debug, Clone)]
pub struct BurstReport {
    pub batch_id: u64,
    pub expected: usize,
    /// Frames that reached the post-processor
    pub delivered: usize,
    /// Saved photos, in capture order
    pub persisted: Vec<PersistedImage>,
    pub failures: Vec<FrameFailure>,
}

impl BurstReport {
    pub fn new(batch_id: u64, expected: usize) -> Self {
        Self {
            batch_id,
            expected,
            delivered: 0,
            persisted: Vec::with_capacity(expected),
            failures: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.delivered == self.expected
    }
}

/// Clears the in-flight flag when the burst ends, however it ends
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Submits bursts and collects their frames
///
/// At most one burst is in flight; the reader has a single listener slot.
pub struct BurstCoordinator {
    processor: Arc<ImagePostProcessor>,
    notifier: Notifier,
    timeout: Duration,
    next_batch_id: AtomicU64,
    in_flight: Arc<AtomicBool>,
}

impl BurstCoordinator {
    pub fn new(processor: Arc<ImagePostProcessor>, notifier: Notifier, timeout: Duration) -> Self {
        Self {
            processor,
            notifier,
            timeout,
            next_batch_id: AtomicU64::new(1),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Install the frame listener and submit `count` still requests
    ///
    /// The returned [`PendingBurst`] collects the frames; the caller awaits
    /// it without holding up whoever owns the session.
    pub fn submit(
        &self,
        count: usize,
        session: &dyn CaptureSession,
        reader: &ImageReader,
        ctx: OrientationContext,
        state: watch::Receiver<SessionState>,
    ) -> Result<PendingBurst, CaptureError> {
        if count == 0 {
            return Err(CaptureError::InvalidBurstSize);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Rejecting burst: another burst is in progress");
            return Err(CaptureError::BurstInProgress);
        }
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        let batch_id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let (tx, frames) = mpsc::unbounded_channel();

        let stale = reader.discard_queued();
        if stale > 0 {
            debug!(stale, "Released images queued before the burst");
        }

        let registration = reader.set_on_image_available(Arc::new(move |reader: &ImageReader| {
            loop {
                let image = match reader.acquire_next_image() {
                    Ok(Some(image)) => image,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "Stopped reading frames");
                        break;
                    }
                };
                let token = image.token();
                if token.batch != batch_id {
                    warn!(batch = token.batch, expected = batch_id, "Dropping frame from another batch");
                    continue;
                }
                let bytes = image.bytes().to_vec();
                drop(image);
                let _ = tx.send(RawFrame {
                    capture_index: token.index,
                    bytes,
                });
            }
        }));

        let batch = CaptureRequestBatch::still(batch_id, count, reader.size());
        session.capture_burst(&batch)?;

        info!(batch = batch_id, count, rotation = ctx.rotation_degrees(), "Burst submitted");

        Ok(PendingBurst {
            batch_id,
            expected: count,
            frames,
            state,
            deadline: Instant::now() + self.timeout,
            collector: Collector {
                processor: Arc::clone(&self.processor),
                notifier: self.notifier.clone(),
                ctx,
            },
            _registration: registration,
            _in_flight: guard,
        })
    }
}

impl std::fmt::Debug for BurstCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BurstCoordinator")
            .field("timeout", &self.timeout)
            .field("busy", &self.is_busy())
            .finish()
    }
}

struct Collector {
    processor: Arc<ImagePostProcessor>,
    notifier: Notifier,
    ctx: OrientationContext,
}

impl Collector {
    async fn persist(&self, frame: RawFrame, report: &mut BurstReport) {
        let index = frame.capture_index;
        match self.processor.process(frame, self.ctx).await {
            Ok(image) => report.persisted.push(image),
            Err(e) => {
                error!(index, error = %e, "Failed to save burst frame");
                self.notifier.notify(Notification::PersistFailed { index });
                report.failures.push(FrameFailure {
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// A submitted burst waiting for its frames
pub struct PendingBurst {
    batch_id: u64,
    expected: usize,
    frames: mpsc::UnboundedReceiver<RawFrame>,
    state: watch::Receiver<SessionState>,
    deadline: Instant,
    collector: Collector,
    _registration: ListenerRegistration,
    _in_flight: InFlightGuard,
}

impl PendingBurst {
    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Collect and persist the burst
    ///
    /// Returns [`CaptureError::PartialBurst`] when fewer frames than
    /// requested arrived; the frames that did arrive are saved and listed in
    /// the error's report.
    pub async fn wait(self) -> Result<BurstReport, CaptureError> {
        let PendingBurst {
            batch_id,
            expected,
            mut frames,
            mut state,
            deadline,
            collector,
            _registration,
            _in_flight,
        } = self;

        let mut report = BurstReport::new(batch_id, expected);
        let mut waiting: BTreeMap<usize, RawFrame> = BTreeMap::new();
        let mut next_index = 0;

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        while report.delivered < expected {
            tokio::select! {
                biased;
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };
                    if accept(frame, &mut waiting, &mut report, next_index) {
                        while let Some(frame) = waiting.remove(&next_index) {
                            collector.persist(frame, &mut report).await;
                            next_index += 1;
                        }
                    }
                }
                _ = &mut sleep => {
                    warn!(batch = batch_id, delivered = report.delivered, expected, "Burst timed out");
                    break;
                }
                changed = state.changed() => {
                    let ready = changed.is_ok() && state.borrow().is_ready();
                    if !ready {
                        warn!(batch = batch_id, delivered = report.delivered, "Session left ready state during burst");
                        break;
                    }
                }
            }
        }

        // Stop listening before draining so the set of frames is final.
        // Stills that arrive from here on are discarded by the reader.
        drop(_registration);
        while let Ok(frame) = frames.try_recv() {
            accept(frame, &mut waiting, &mut report, next_index);
        }
        for (_, frame) in std::mem::take(&mut waiting) {
            collector.persist(frame, &mut report).await;
        }

        let notifier = &collector.notifier;
        if report.delivered == 0 {
            notifier.notify(Notification::ImageUnavailable);
        } else if report.delivered < expected {
            notifier.notify(Notification::PartialBurst {
                delivered: report.delivered,
                expected,
            });
        } else if !report.persisted.is_empty() {
            if expected == 1 {
                notifier.notify(Notification::PhotoSaved);
            } else {
                notifier.notify(Notification::BurstCaptured {
                    count: report.persisted.len(),
                });
            }
        }

        info!(
            batch = batch_id,
            delivered = report.delivered,
            persisted = report.persisted.len(),
            failed = report.failures.len(),
            expected,
            "Burst finished"
        );

        if report.is_complete() {
            Ok(report)
        } else {
            Err(CaptureError::PartialBurst {
                delivered: report.delivered,
                expected,
                report,
            })
        }
    }
}

/// Queue a frame for in-order processing; false when it is dropped
fn accept(
    frame: RawFrame,
    waiting: &mut BTreeMap<usize, RawFrame>,
    report: &mut BurstReport,
    next_index: usize,
) -> bool {
    let index = frame.capture_index;
    if index >= report.expected || index < next_index || waiting.contains_key(&index) {
        warn!(index, "Dropping unexpected or duplicate frame");
        return false;
    }
    waiting.insert(index, frame);
    report.delivered += 1;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{
        BackendResult, CameraFacing, CaptureRequest, CaptureToken, DisplayRotation, Resolution,
    };
    use crate::pipelines::photo::{EncodingQuality, PhotoEncoder};
    use crate::storage::{FsMediaStore, image_registry};
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;

    /// Session that delivers the listed indices straight into the reader
    struct ScriptedSession {
        surface: crate::backends::camera::ImageSurface,
        deliver: Vec<usize>,
        batch_override: Option<u64>,
        submitted: Mutex<Vec<u64>>,
    }

    impl CaptureSession for ScriptedSession {
        fn set_repeating_request(&self, _request: CaptureRequest) -> BackendResult<()> {
            Ok(())
        }

        fn capture_burst(&self, batch: &CaptureRequestBatch) -> BackendResult<()> {
            self.submitted.lock().unwrap().push(batch.id());
            let frame = RgbImage::from_pixel(8, 4, Rgb([0, 200, 0]));
            let bytes = PhotoEncoder::default().encode_jpeg(&frame).unwrap();
            for &index in &self.deliver {
                let batch = self.batch_override.unwrap_or(batch.id());
                self.surface
                    .queue_image(CaptureToken { batch, index }, bytes.clone())?;
            }
            Ok(())
        }

        fn close(&self) {}

        fn is_closed(&self) -> bool {
            false
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        coordinator: BurstCoordinator,
        reader: ImageReader,
        notifications: mpsc::UnboundedReceiver<Notification>,
        _state_tx: watch::Sender<SessionState>,
        state: watch::Receiver<SessionState>,
    }

    fn fixture(timeout: Duration) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, _registry) = image_registry(None);
        let processor = Arc::new(ImagePostProcessor::new(
            Arc::new(FsMediaStore::new(dir.path())),
            publisher,
            EncodingQuality::Maximum,
        ));
        let (notifier, notifications) = Notifier::channel();
        let (state_tx, state) = watch::channel(SessionState::SessionReady);
        Fixture {
            _dir: dir,
            coordinator: BurstCoordinator::new(processor, notifier, timeout),
            reader: ImageReader::new(Resolution::new(8, 4), 10),
            notifications,
            _state_tx: state_tx,
            state,
        }
    }

    fn session(reader: &ImageReader, deliver: Vec<usize>) -> ScriptedSession {
        ScriptedSession {
            surface: reader.surface(),
            deliver,
            batch_override: None,
            submitted: Mutex::new(Vec::new()),
        }
    }

    fn ctx() -> OrientationContext {
        OrientationContext::new(DisplayRotation::Rotation90, CameraFacing::Back)
    }

    #[tokio::test]
    async fn test_out_of_order_frames_are_persisted_in_capture_order() {
        let mut fx = fixture(Duration::from_secs(2));
        let session = session(&fx.reader, vec![2, 0, 1]);

        let pending = fx
            .coordinator
            .submit(3, &session, &fx.reader, ctx(), fx.state.clone())
            .unwrap();
        let report = pending.wait().await.unwrap();

        assert_eq!(report.delivered, 3);
        assert_eq!(report.persisted.len(), 3);
        for pair in report.persisted.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
        assert_eq!(
            fx.notifications.try_recv().unwrap(),
            Notification::BurstCaptured { count: 3 }
        );
    }

    #[tokio::test]
    async fn test_missing_frames_yield_partial_burst() {
        let mut fx = fixture(Duration::from_millis(200));
        let session = session(&fx.reader, vec![0, 1, 3]);

        let pending = fx
            .coordinator
            .submit(5, &session, &fx.reader, ctx(), fx.state.clone())
            .unwrap();
        let err = pending.wait().await.unwrap_err();

        match err {
            CaptureError::PartialBurst {
                delivered,
                expected,
                report,
            } => {
                assert_eq!((delivered, expected), (3, 5));
                assert_eq!(report.persisted.len(), 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            fx.notifications.try_recv().unwrap(),
            Notification::PartialBurst {
                delivered: 3,
                expected: 5
            }
        );
    }

    #[tokio::test]
    async fn test_frames_from_other_batches_are_ignored() {
        let mut fx = fixture(Duration::from_millis(100));
        let mut session = session(&fx.reader, vec![0]);
        session.batch_override = Some(999);

        let pending = fx
            .coordinator
            .submit(1, &session, &fx.reader, ctx(), fx.state.clone())
            .unwrap();
        let err = pending.wait().await.unwrap_err();

        assert!(matches!(err, CaptureError::PartialBurst { delivered: 0, .. }));
        assert_eq!(fx.reader.buffers_in_use(), 0);
        assert_eq!(
            fx.notifications.try_recv().unwrap(),
            Notification::ImageUnavailable
        );
    }

    #[tokio::test]
    async fn test_second_burst_is_rejected_while_first_is_pending() {
        let fx = fixture(Duration::from_millis(100));
        let session = session(&fx.reader, vec![]);

        let first = fx
            .coordinator
            .submit(2, &session, &fx.reader, ctx(), fx.state.clone())
            .unwrap();
        assert!(matches!(
            fx.coordinator
                .submit(2, &session, &fx.reader, ctx(), fx.state.clone()),
            Err(CaptureError::BurstInProgress)
        ));

        let _ = first.wait().await;
        assert!(!fx.coordinator.is_busy());
        assert!(
            fx.coordinator
                .submit(1, &session, &fx.reader, ctx(), fx.state.clone())
                .is_ok()
        );
    }

    #[test]
    fn test_zero_sized_burst_is_rejected() {
        let fx = fixture(Duration::from_millis(100));
        let session = session(&fx.reader, vec![]);
        assert!(matches!(
            fx.coordinator
                .submit(0, &session, &fx.reader, ctx(), fx.state.clone()),
            Err(CaptureError::InvalidBurstSize)
        ));
        assert!(session.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_frames_arriving_after_timeout_release_their_buffers() {
        let fx = fixture(Duration::from_millis(50));
        let silent = session(&fx.reader, vec![]);

        let pending = fx
            .coordinator
            .submit(3, &silent, &fx.reader, ctx(), fx.state.clone())
            .unwrap();
        let late_batch = pending.batch_id();
        let err = pending.wait().await.unwrap_err();
        assert!(matches!(err, CaptureError::PartialBurst { delivered: 0, .. }));

        // More late stills than the pool holds
        let surface = fx.reader.surface();
        for index in 0..fx.reader.capacity() + 5 {
            surface
                .queue_image(CaptureToken { batch: late_batch, index }, vec![0xff])
                .unwrap();
        }
        assert_eq!(fx.reader.buffers_in_use(), 0);

        let next = session(&fx.reader, vec![0, 1, 2]);
        let report = fx
            .coordinator
            .submit(3, &next, &fx.reader, ctx(), fx.state.clone())
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(report.persisted.len(), 3);
    }

    #[tokio::test]
    async fn test_submit_releases_images_queued_without_consumer() {
        let fx = fixture(Duration::from_secs(2));
        let surface = fx.reader.surface();
        for index in 0..fx.reader.capacity() {
            surface
                .queue_image(CaptureToken { batch: 0, index }, vec![0xff])
                .unwrap();
        }
        assert_eq!(fx.reader.buffers_in_use(), fx.reader.capacity());

        let session = session(&fx.reader, vec![0, 1]);
        let report = fx
            .coordinator
            .submit(2, &session, &fx.reader, ctx(), fx.state.clone())
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(report.persisted.len(), 2);
        assert_eq!(fx.reader.buffers_in_use(), 0);
    }

    #[tokio::test]
    async fn test_state_change_ends_collection_early() {
        let fx = fixture(Duration::from_secs(30));
        let session = session(&fx.reader, vec![0]);

        let pending = fx
            .coordinator
            .submit(4, &session, &fx.reader, ctx(), fx.state.clone())
            .unwrap();
        fx._state_tx.send_replace(SessionState::Closing);

        let started = std::time::Instant::now();
        let err = pending.wait().await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(err, CaptureError::PartialBurst { delivered: 1, expected: 4, .. }));
    }
}
