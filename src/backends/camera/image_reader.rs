// SPDX-License-Identifier: GPL-3.0-only

//! Bounded pool of still-capture buffers
//!
//! The platform writes encoded stills into an [`ImageSurface`]; consumers
//! pull them back out of the [`ImageReader`] strictly in arrival order.
//! Each queued or acquired [`Image`] occupies one slot of a fixed-size pool
//! until it is dropped, so a consumer that holds on to images stalls the
//! producer. Consumers are expected to copy the bytes out and drop the image
//! straight away.

use super::types::{BackendError, BackendResult, CaptureToken, Resolution};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Callback invoked on the producer thread each time an image is queued
pub type ImageAvailableListener = Arc<dyn Fn(&ImageReader) + Send + Sync>;

struct ReaderShared {
    size: Resolution,
    capacity: usize,
    pool: Arc<Semaphore>,
    queue: Mutex<VecDeque<Image>>,
    listener: Mutex<Option<(u64, ImageAvailableListener)>>,
    next_listener_id: AtomicU64,
    closed: AtomicBool,
}

impl ReaderShared {
    fn current_listener(&self) -> Option<ImageAvailableListener> {
        self.listener
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|(_, listener)| Arc::clone(listener)))
    }
}

/// A captured still occupying one pool slot
///
/// Dropping the image returns its slot to the pool.
pub struct Image {
    token: CaptureToken,
    bytes: Vec<u8>,
    timestamp: Instant,
    _slot: OwnedSemaphorePermit,
}

impl Image {
    pub fn token(&self) -> CaptureToken {
        self.token
    }

    /// Encoded bytes of the still
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// When the producer queued the image
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("token", &self.token)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Consumer side of the buffer pool
pub struct ImageReader {
    shared: Arc<ReaderShared>,
}

impl ImageReader {
    /// Create a reader producing images of `size` with `capacity` buffers
    pub fn new(size: Resolution, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!(%size, capacity, "Creating image reader");

        Self {
            shared: Arc::new(ReaderShared {
                size,
                capacity,
                pool: Arc::new(Semaphore::new(capacity)),
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                listener: Mutex::new(None),
                next_listener_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn size(&self) -> Resolution {
        self.shared.size
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Buffers currently queued or held by consumers
    pub fn buffers_in_use(&self) -> usize {
        self.shared.capacity - self.shared.pool.available_permits()
    }

    /// Producer endpoint to bind into a capture session
    pub fn surface(&self) -> ImageSurface {
        ImageSurface {
            shared: Arc::downgrade(&self.shared),
            size: self.shared.size,
        }
    }

    /// Take the oldest queued image
    ///
    /// Returns `Ok(None)` when nothing is queued. Images are never skipped:
    /// a burst of N stills is read back as exactly those N stills in order.
    pub fn acquire_next_image(&self) -> BackendResult<Option<Image>> {
        if self.is_closed() {
            return Err(BackendError::ReaderClosed);
        }
        let mut queue = self
            .shared
            .queue
            .lock()
            .map_err(|_| BackendError::Other("image queue poisoned".into()))?;
        Ok(queue.pop_front())
    }

    /// Drop every queued image, returning how many were released
    pub fn discard_queued(&self) -> usize {
        let mut discarded = 0;
        while let Ok(Some(_image)) = self.acquire_next_image() {
            discarded += 1;
        }
        discarded
    }

    /// Install the image-available listener
    ///
    /// Replaces any previous listener. When the returned registration is
    /// dropped the reader goes back to discarding whatever arrives, so late
    /// stills never pin pool slots without a consumer.
    pub fn set_on_image_available(&self, listener: ImageAvailableListener) -> ListenerRegistration {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut slot) = self.shared.listener.lock() {
            *slot = Some((id, listener));
        }
        ListenerRegistration {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// Release every queued buffer and stop accepting new ones
    ///
    /// Closing an already closed reader is a no-op.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = self
            .shared
            .queue
            .lock()
            .map(|mut queue| {
                let n = queue.len();
                queue.clear();
                n
            })
            .unwrap_or(0);
        if let Ok(mut slot) = self.shared.listener.lock() {
            slot.take();
        }
        debug!(dropped, "Image reader closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ImageReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageReader")
            .field("size", &self.shared.size)
            .field("capacity", &self.shared.capacity)
            .field("in_use", &self.buffers_in_use())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Keeps an image-available listener installed
pub struct ListenerRegistration {
    shared: Weak<ReaderShared>,
    id: u64,
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let replaced = match shared.listener.lock() {
            Ok(mut slot) if slot.as_ref().is_some_and(|(id, _)| *id == self.id) => {
                let id = shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
                let discard: ImageAvailableListener = Arc::new(discard_late_images);
                *slot = Some((id, discard));
                true
            }
            _ => false,
        };
        if !replaced {
            return;
        }

        let reader = ImageReader { shared };
        let discarded = reader.discard_queued();
        if discarded > 0 {
            debug!(discarded, "Released images left behind by listener");
        }
    }
}

fn discard_late_images(reader: &ImageReader) {
    let discarded = reader.discard_queued();
    if discarded > 0 {
        debug!(discarded, "Discarded image with no consumer");
    }
}

/// Producer side of the buffer pool, bound into a capture session
#[derive(Clone)]
pub struct ImageSurface {
    shared: Weak<ReaderShared>,
    size: Resolution,
}

impl ImageSurface {
    pub fn size(&self) -> Resolution {
        self.size
    }

    /// Queue an encoded still and notify the listener on this thread
    pub fn queue_image(&self, token: CaptureToken, bytes: Vec<u8>) -> BackendResult<()> {
        let shared = self.shared.upgrade().ok_or(BackendError::ReaderClosed)?;
        if shared.closed.load(Ordering::Acquire) {
            return Err(BackendError::ReaderClosed);
        }

        let slot = Arc::clone(&shared.pool).try_acquire_owned().map_err(|_| {
            warn!(capacity = shared.capacity, "Image reader pool exhausted");
            BackendError::BufferPoolExhausted {
                capacity: shared.capacity,
            }
        })?;

        let image = Image {
            token,
            bytes,
            timestamp: Instant::now(),
            _slot: slot,
        };
        shared
            .queue
            .lock()
            .map_err(|_| BackendError::Other("image queue poisoned".into()))?
            .push_back(image);

        // Invoke outside the queue lock; the listener acquires from the queue.
        if let Some(listener) = shared.current_listener() {
            let reader = ImageReader {
                shared: Arc::clone(&shared),
            };
            listener(&reader);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ImageSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSurface")
            .field("size", &self.size)
            .finish()
    }
}
