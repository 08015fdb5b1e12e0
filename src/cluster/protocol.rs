//! Messages exchanged between workers and the coordinator.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::net::MAX_FRAME_SIZE;

/// Encoded size budget for one message, well under the frame limit.
pub const MESSAGE_BUDGET: usize = MAX_FRAME_SIZE / 2;

/// Largest key, once JSON-encoded, that can travel between processes.
pub const MAX_KEY_SIZE: usize = 64 * 1024;

// Upper bounds on the JSON around the entries of a message
const MESSAGE_OVERHEAD: usize = 256;
const COUNT_OVERHEAD: usize = 24;

/// Identity of a worker process within the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Create a worker id from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a random worker id.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Length of `key` as a JSON string literal.
pub fn encoded_len(key: &str) -> usize {
    serde_json::to_string(key).map_or(key.len() * 6 + 2, |encoded| encoded.len())
}

/// Increments a worker observed since its last successful flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flush {
    /// The reporting worker
    pub worker_id: WorkerId,
    /// Hits per key since the last flush
    pub increments: HashMap<String, u64>,
    /// Most recent caller-supplied limit per key
    #[serde(default)]
    pub limits: HashMap<String, u64>,
}

impl Flush {
    /// Total hits carried by this flush.
    pub fn total(&self) -> u64 {
        self.increments.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.increments.is_empty()
    }

    /// Split into flushes whose encoding stays within `budget` bytes.
    ///
    /// Every key lands in exactly one part, together with its limit. Keys
    /// are expected to be no larger than [`MAX_KEY_SIZE`].
    pub fn split(self, budget: usize) -> Vec<Flush> {
        let Flush {
            worker_id,
            increments,
            mut limits,
        } = self;
        let overhead = MESSAGE_OVERHEAD + encoded_len(worker_id.as_str());
        let empty = || Flush {
            worker_id: worker_id.clone(),
            ..Default::default()
        };

        let mut parts = Vec::new();
        let mut current = empty();
        let mut size = overhead;

        for (key, hits) in increments {
            // The key appears once in each map
            let cost = 2 * (encoded_len(&key) + COUNT_OVERHEAD);
            if !current.is_empty() && size + cost > budget {
                parts.push(std::mem::replace(&mut current, empty()));
                size = overhead;
            }
            if let Some(limit) = limits.remove(&key) {
                current.limits.insert(key.clone(), limit);
            }
            current.increments.insert(key, hits);
            size += cost;
        }

        if !current.is_empty() || parts.is_empty() {
            parts.push(current);
        }
        parts
    }
}

/// Block decisions pushed from the coordinator.
///
/// A full update replaces the receiver's cache with `keys`. A delta adds
/// `keys` and removes `unblocked`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUpdate {
    /// Whether this is a complete snapshot
    pub full: bool,
    /// Blocked keys (all of them when `full`, newly blocked otherwise)
    pub keys: BTreeSet<String>,
    /// Keys no longer blocked; always empty on a full snapshot
    #[serde(default)]
    pub unblocked: BTreeSet<String>,
    /// When the coordinator issued the update (Unix epoch milliseconds)
    pub issued_at_ms: i64,
}

impl BlockUpdate {
    /// Build a full snapshot of `keys`.
    pub fn snapshot(keys: BTreeSet<String>) -> Self {
        Self {
            full: true,
            keys,
            unblocked: BTreeSet::new(),
            issued_at_ms: now_millis(),
        }
    }

    /// Build the delta that turns `previous` into `current`.
    ///
    /// Returns `None` when nothing changed.
    pub fn delta(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> Option<Self> {
        let keys: BTreeSet<String> = current.difference(previous).cloned().collect();
        let unblocked: BTreeSet<String> = previous.difference(current).cloned().collect();

        if keys.is_empty() && unblocked.is_empty() {
            return None;
        }

        Some(Self {
            full: false,
            keys,
            unblocked,
            issued_at_ms: now_millis(),
        })
    }

    /// An update that changes nothing and only proves the coordinator is
    /// alive.
    pub fn heartbeat() -> Self {
        Self {
            issued_at_ms: now_millis(),
            ..Default::default()
        }
    }

    /// Whether applying this update leaves a synced cache untouched.
    pub fn is_empty(&self) -> bool {
        !self.full && self.keys.is_empty() && self.unblocked.is_empty()
    }

    /// Split into updates whose encoding stays within `budget` bytes.
    ///
    /// A full snapshot becomes a full first part followed by additive
    /// deltas, so applying the parts in order rebuilds the same set.
    pub fn split(self, budget: usize) -> Vec<BlockUpdate> {
        let BlockUpdate {
            full,
            keys,
            unblocked,
            issued_at_ms,
        } = self;
        let part = |full| BlockUpdate {
            full,
            issued_at_ms,
            ..Default::default()
        };

        let mut parts = Vec::new();
        let mut current = part(full);
        let mut size = MESSAGE_OVERHEAD;
        let entries = keys
            .into_iter()
            .map(|key| (key, true))
            .chain(unblocked.into_iter().map(|key| (key, false)));

        for (key, blocked) in entries {
            let cost = encoded_len(&key) + 1;
            let has_entries = !current.keys.is_empty() || !current.unblocked.is_empty();
            if has_entries && size + cost > budget {
                parts.push(std::mem::replace(&mut current, part(false)));
                size = MESSAGE_OVERHEAD;
            }
            if blocked {
                current.keys.insert(key);
            } else {
                current.unblocked.insert(key);
            }
            size += cost;
        }

        parts.push(current);
        parts
    }

    /// Milliseconds elapsed since the update was issued.
    pub fn age_ms(&self) -> i64 {
        (now_millis() - self.issued_at_ms).max(0)
    }
}

/// Worker to coordinator traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// First frame on a network connection
    Hello { worker_id: WorkerId },
    /// Buffered increments
    Flush(Flush),
    /// Ask for a full block snapshot
    Resync,
}

/// Coordinator to worker traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    BlockUpdate(BlockUpdate),
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
