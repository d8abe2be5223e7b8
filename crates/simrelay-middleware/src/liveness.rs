//! [`LivenessMonitor`] – rate-limited "no client" warning.
//!
//! Every outbound message that finds no TCP client is a *miss*.  Misses are
//! counted; when the count reaches the threshold a single warning is logged
//! and the window starts over.  A successful delivery also starts a new
//! window, so only consecutive misses are counted.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::warn;

/// Consecutive misses tolerated before warning.
pub const DEFAULT_NO_CLIENT_THRESHOLD: u32 = 60;

#[derive(Debug)]
pub struct LivenessMonitor {
    threshold: u32,
    misses: AtomicU32,
}

impl LivenessMonitor {
    /// Create a monitor that warns every `threshold` misses (minimum 1).
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            misses: AtomicU32::new(0),
        }
    }

    /// Record one miss.  Returns `true` when this miss closed a window and a
    /// warning was emitted.
    pub fn record_miss(&self) -> bool {
        let threshold = self.threshold;
        let previous = self
            .misses
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(if n + 1 >= threshold { 0 } else { n + 1 })
            })
            .unwrap_or_default();

        let warned = previous + 1 >= threshold;
        if warned {
            warn!(consecutive_misses = threshold, "No active TCP client. Message not sent.");
        }
        warned
    }

    /// Record a delivered message, starting a fresh window.
    pub fn record_delivery(&self) {
        self.misses.store(0, Ordering::Release);
    }

    /// Misses counted in the current window.
    pub fn misses(&self) -> u32 {
        self.misses.load(Ordering::Acquire)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

impl Default for LivenessMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_NO_CLIENT_THRESHOLD)
    }
}
