//! Frame broadcast hub
//!
//! Fans frames from the single capture source out to any number of
//! subscribers. Each subscriber owns a bounded [`FrameQueue`]; when it is full
//! the oldest buffered frame is discarded, so a slow or stalled viewer never
//! holds up the pump or its peers.

mod pump;
mod queue;

pub use pump::PumpHandle;
pub use queue::{FrameQueue, PushOutcome};

use crate::errors::{CameraError, HubError};
use crate::platform::CaptureSource;
use crate::types::Frame;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Buffer depth used by [`FrameHub::subscribe`].
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Snapshot of hub counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    pub subscribers: usize,
    pub frames_published: u64,
    /// Frames discarded by the drop-oldest policy, across all subscribers
    /// past and present.
    pub frames_dropped: u64,
    pub closed: bool,
}

struct Registry {
    subscribers: HashMap<SubscriberId, Arc<FrameQueue>>,
    closed: bool,
}

struct HubInner {
    registry: Mutex<Registry>,
    default_capacity: usize,
    next_id: AtomicU64,
    frames_published: AtomicU64,
    departed_dropped: AtomicU64,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.lock().subscribers.remove(&id);
        match removed {
            Some(queue) => {
                queue.close();
                self.departed_dropped
                    .fetch_add(queue.dropped(), Ordering::Relaxed);
                log::debug!("Unsubscribed {}", id);
                true
            }
            None => false,
        }
    }
}

/// Cloneable handle to the process-wide hub.
#[derive(Clone)]
pub struct FrameHub {
    inner: Arc<HubInner>,
}

impl FrameHub {
    pub fn new() -> Self {
        Self::with_default_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn with_default_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                registry: Mutex::new(Registry {
                    subscribers: HashMap::new(),
                    closed: false,
                }),
                default_capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
                frames_published: AtomicU64::new(0),
                departed_dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscriber with the hub's default buffer depth.
    pub fn subscribe(&self) -> Result<Subscription, HubError> {
        self.subscribe_with_capacity(self.inner.default_capacity)
    }

    /// Register a subscriber. It receives frames published from now on; past
    /// frames are not replayed.
    pub fn subscribe_with_capacity(&self, capacity: usize) -> Result<Subscription, HubError> {
        let mut registry = self.inner.lock();
        if registry.closed {
            return Err(HubError::SourceClosed);
        }

        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let queue = Arc::new(FrameQueue::new(capacity));
        registry.subscribers.insert(id, Arc::clone(&queue));
        drop(registry);

        log::debug!("Subscribed {} (buffer {})", id, capacity.max(1));
        Ok(Subscription {
            id,
            queue,
            hub: Arc::downgrade(&self.inner),
        })
    }

    /// Remove a subscriber. Idempotent; returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.remove(id)
    }

    /// Hand a frame to every registered subscriber without blocking.
    ///
    /// Returns the number of subscribers the frame was queued for. Subscribers
    /// whose queue has been closed are removed.
    pub fn publish(&self, frame: Frame) -> usize {
        let mut registry = self.inner.lock();
        if registry.closed {
            return 0;
        }

        let mut delivered = 0;
        let mut departed = Vec::new();
        for (id, queue) in registry.subscribers.iter() {
            match queue.push_drop_oldest(frame.clone()) {
                PushOutcome::Delivered | PushOutcome::DroppedOldest => delivered += 1,
                PushOutcome::Closed => departed.push(*id),
            }
        }
        for id in departed {
            if let Some(queue) = registry.subscribers.remove(&id) {
                self.inner
                    .departed_dropped
                    .fetch_add(queue.dropped(), Ordering::Relaxed);
                log::debug!("Removed closed subscriber {}", id);
            }
        }
        drop(registry);

        self.inner.frames_published.fetch_add(1, Ordering::Relaxed);
        delivered
    }

    /// Signal end-of-stream: every subscriber is closed and later
    /// `subscribe` calls fail with [`HubError::SourceClosed`].
    pub fn close(&self) {
        let mut registry = self.inner.lock();
        if registry.closed {
            return;
        }
        registry.closed = true;
        let subscribers: Vec<_> = registry.subscribers.drain().collect();
        drop(registry);

        for (_, queue) in &subscribers {
            queue.close();
            self.inner
                .departed_dropped
                .fetch_add(queue.dropped(), Ordering::Relaxed);
        }
        log::info!("Frame hub closed ({} subscribers released)", subscribers.len());
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    pub fn stats(&self) -> HubStats {
        let registry = self.inner.lock();
        let live_dropped: u64 = registry.subscribers.values().map(|q| q.dropped()).sum();
        HubStats {
            subscribers: registry.subscribers.len(),
            frames_published: self.inner.frames_published.load(Ordering::Relaxed),
            frames_dropped: live_dropped
                + self.inner.departed_dropped.load(Ordering::Relaxed),
            closed: registry.closed,
        }
    }

    /// Start the capture pump on its own thread. The source must already be
    /// open and started.
    pub fn spawn_pump(&self, source: Arc<CaptureSource>) -> Result<PumpHandle, CameraError> {
        PumpHandle::spawn(self.clone(), source)
    }
}

impl Default for FrameHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered delivery target.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    id: SubscriberId,
    queue: Arc<FrameQueue>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next frame in production order, or `None` after end-of-stream.
    pub async fn recv(&self) -> Option<Frame> {
        self.queue.pop().await
    }

    pub fn try_recv(&self) -> Option<Frame> {
        self.queue.try_pop()
    }

    /// Frames this subscriber lost to the drop-oldest policy.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        match self.hub.upgrade() {
            Some(hub) => {
                hub.remove(self.id);
            }
            None => self.queue.close(),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("buffered", &self.queue.len())
            .field("dropped", &self.queue.dropped())
            .finish()
    }
}
