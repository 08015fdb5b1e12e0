//! Single-process limiter with no cross-process coordination.

use tracing::{info, warn};

use super::backend::{LocalLimiter, RateLimit};
use super::limiter::MemoryLimiter;
use crate::config::ClusterLimitConfig;
use crate::error::Result;

/// The local limiter exposed directly for single-process deployments.
#[derive(Debug)]
pub struct Standalone {
    limiter: MemoryLimiter,
}

impl Standalone {
    /// Open the backing store described by `config`.
    pub async fn setup(config: &ClusterLimitConfig) -> Result<Self> {
        let limiter = MemoryLimiter::open(config.window_size(), &config.limiter)?;
        info!(window_ms = config.window_size_ms, "Standalone limiter ready");
        Ok(Self { limiter })
    }

    /// Wrap an already opened store.
    pub fn with_limiter(limiter: MemoryLimiter) -> Self {
        Self { limiter }
    }

    /// Access the backing store.
    pub fn limiter(&self) -> &MemoryLimiter {
        &self.limiter
    }
}

impl RateLimit for Standalone {
    fn is_above_limit(&self, key: &str, limit: u64, increment: u64) -> bool {
        match self.limiter.increment(key, limit, increment) {
            Ok(above) => above,
            Err(e) => {
                warn!(key = %key, error = %e, "Limiter backend failed, allowing request");
                false
            }
        }
    }
}
