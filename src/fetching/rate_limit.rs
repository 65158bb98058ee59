//! Shared minimum-interval gate for upstream requests.
//!
//! Every caller reserves a slot on one shared timeline, so the gate bounds
//! the upstream request rate regardless of how many workers run.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateLimitGate {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimitGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for a slot covering `weight` upstream requests
    pub async fn acquire(&self, weight: u32) {
        let start = self.reserve(weight);
        tokio::time::sleep_until(start).await;
    }

    /// Claim the next free window on the timeline, returning when it opens
    fn reserve(&self, weight: u32) -> Instant {
        let mut next_slot = self.next_slot.lock();
        let now = Instant::now();
        let start = (*next_slot).max(now);
        *next_slot = start + self.interval * weight;
        start
    }
}
