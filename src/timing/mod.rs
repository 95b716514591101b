//! Timing utilities: presentation timestamps for captured frames and the
//! per-session rate limiter used by socket viewers.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic clock for presentation timestamps
///
/// All frame timestamps derive from this single source
/// to ensure monotonic ordering.
#[derive(Debug, Clone)]
pub struct PTSClock {
    start: Arc<Instant>,
}

impl PTSClock {
    /// Create a new PTS clock with the current instant as time zero
    pub fn new() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }

    /// Elapsed time since clock creation, in microseconds.
    #[inline]
    pub fn micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for PTSClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Session-local rate limiter.
///
/// Consecutive calls to [`Pacer::wait`] return at least one period apart,
/// whatever rate frames arrive at. The first call returns immediately.
#[derive(Debug)]
pub struct Pacer {
    period: Duration,
    last: Option<tokio::time::Instant>,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    /// Pacer for a target rate in frames per second (0 is treated as 1).
    pub fn with_fps(fps: u32) -> Self {
        Self::new(Duration::from_secs(1) / fps.max(1))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            tokio::time::sleep_until(last + self.period).await;
        }
        self.last = Some(tokio::time::Instant::now());
    }
}
