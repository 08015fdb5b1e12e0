//! Fixed-window counter implementation.

use std::time::{Duration, Instant};

/// A counter that tracks hits within a fixed time window.
///
/// The window opens on the first increment and the count drops back to zero
/// once `window` has elapsed. The counter itself is not synchronized; the
/// owning store serializes access per key.
#[derive(Debug, Clone)]
pub struct WindowCounter {
    /// Hits recorded in the current window
    count: u64,
    /// Length of each window
    window: Duration,
    /// When the current window started
    window_start: Instant,
}

impl WindowCounter {
    /// Create a new counter with an open, empty window.
    pub fn new(window: Duration) -> Self {
        Self {
            count: 0,
            window,
            window_start: Instant::now(),
        }
    }

    /// Add hits to the current window and return the post-increment count.
    pub fn increment(&mut self, hits: u64) -> u64 {
        self.maybe_reset_window();
        self.count = self.count.saturating_add(hits);
        self.count
    }

    /// Get the count for the current window.
    pub fn current_count(&self) -> u64 {
        if self.is_expired() {
            0
        } else {
            self.count
        }
    }

    /// Whether the window this counter last saw has ended.
    pub fn is_expired(&self) -> bool {
        self.window_start.elapsed() >= self.window
    }

    fn maybe_reset_window(&mut self) {
        if self.is_expired() {
            self.count = 0;
            self.window_start = Instant::now();
        }
    }
}
