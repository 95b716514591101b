use crate::types::Frame;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

/// Result of handing a frame to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// Delivered after discarding the oldest buffered frame.
    DroppedOldest,
    /// The subscriber is gone; the frame was not queued.
    Closed,
}

/// Bounded single-consumer frame queue with a drop-oldest overflow policy.
///
/// Pushing never blocks on the consumer.
pub struct FrameQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

struct QueueInner {
    items: VecDeque<Frame>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                dropped: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn push_drop_oldest(&self, frame: Frame) -> PushOutcome {
        let mut g = self.lock();
        if g.closed {
            return PushOutcome::Closed;
        }

        let outcome = if g.items.len() >= g.capacity {
            g.items.pop_front();
            g.dropped = g.dropped.saturating_add(1);
            PushOutcome::DroppedOldest
        } else {
            PushOutcome::Delivered
        };
        g.items.push_back(frame);
        drop(g);

        self.notify.notify_one();
        outcome
    }

    /// Wait for the next frame.
    ///
    /// Buffered frames are still handed out after `close`; `None` is returned
    /// once the queue is closed and empty.
    pub async fn pop(&self) -> Option<Frame> {
        loop {
            // Register before checking, so a `close` that lands in between
            // still reaches this waiter.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut g = self.lock();
                if let Some(frame) = g.items.pop_front() {
                    return Some(frame);
                }
                if g.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<Frame> {
        self.lock().items.pop_front()
    }

    /// Wakes every pending `pop`, not just one.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    // Frames are immutable, so a panic while holding the lock cannot leave the
    // queue half-updated in a way that matters to readers.
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
