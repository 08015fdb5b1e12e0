//! In-memory local limiter.

use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, trace};

use super::backend::LocalLimiter;
use super::counter::WindowCounter;
use crate::config::LimiterOptions;
use crate::error::{LimiterError, Result};

/// A fixed-window limiter keeping every counter in process memory.
///
/// This struct is thread-safe and can be shared across multiple tasks.
#[derive(Debug)]
pub struct MemoryLimiter {
    /// Counters indexed by key
    counters: DashMap<String, WindowCounter>,
    /// Window length applied to every counter
    window: Duration,
    /// Upper bound on tracked keys
    max_keys: usize,
}

impl MemoryLimiter {
    /// Initialize the store.
    ///
    /// Fails with [`LimiterError::Setup`] when the options cannot describe a
    /// usable store.
    pub fn open(window: Duration, options: &LimiterOptions) -> Result<Self> {
        if window.is_zero() {
            return Err(LimiterError::Setup("window size must be positive".into()));
        }
        if options.max_keys == 0 {
            return Err(LimiterError::Setup("max_keys must be positive".into()));
        }

        debug!(
            window_ms = window.as_millis() as u64,
            max_keys = options.max_keys,
            "Opened in-memory limiter"
        );

        Ok(Self {
            counters: DashMap::new(),
            window,
            max_keys: options.max_keys,
        })
    }

    /// Get the number of tracked counters.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    fn ensure_capacity(&self, key: &str) -> Result<()> {
        if self.counters.contains_key(key) || self.counter_count() < self.max_keys {
            return Ok(());
        }
        self.evict_expired();
        if self.counter_count() < self.max_keys {
            return Ok(());
        }
        Err(LimiterError::Backend(format!(
            "store full: {} keys tracked",
            self.max_keys
        )))
    }
}

impl LocalLimiter for MemoryLimiter {
    fn increment(&self, key: &str, limit: u64, increment: u64) -> Result<bool> {
        self.ensure_capacity(key)?;

        let count = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| WindowCounter::new(self.window))
            .increment(increment);

        trace!(key = %key, count = count, limit = limit, "Incremented counter");

        Ok(count > limit)
    }

    fn count(&self, key: &str) -> Result<u64> {
        Ok(self
            .counters
            .get(key)
            .map(|counter| counter.current_count())
            .unwrap_or(0))
    }

    fn evict_expired(&self) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.is_expired());
        let evicted = before.saturating_sub(self.counters.len());
        if evicted > 0 {
            debug!(evicted = evicted, "Evicted expired counters");
        }
        evicted
    }
}
