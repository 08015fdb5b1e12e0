//! Traits shared by every limiter role.

use crate::error::Result;

/// The check contract every deployment role implements.
///
/// Call sites hold a `RateLimit` and stay agnostic to whether they run
/// standalone, inside the coordinator, or as a worker.
pub trait RateLimit: Send + Sync {
    /// Record `increment` hits for `key` and report whether the key is over
    /// `limit`.
    ///
    /// Never blocks on I/O and never fails; degraded state resolves to a
    /// boolean according to the role's policy.
    fn is_above_limit(&self, key: &str, limit: u64, increment: u64) -> bool;

    /// [`RateLimit::is_above_limit`] with an increment of one.
    fn check(&self, key: &str, limit: u64) -> bool {
        self.is_above_limit(key, limit, 1)
    }
}

/// Single-process counting capability backing the coordinator and the
/// standalone role.
pub trait LocalLimiter: Send + Sync {
    /// Atomically add `increment` to the key's current-window count.
    ///
    /// Returns `true` when the post-increment count exceeds `limit`.
    fn increment(&self, key: &str, limit: u64, increment: u64) -> Result<bool>;

    /// Current-window count for a key, zero if unknown or expired.
    fn count(&self, key: &str) -> Result<u64>;

    /// Drop counters whose window has ended. Returns how many were removed.
    fn evict_expired(&self) -> usize;
}
