//! The worker agent: synchronous checks against cached block state.

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::link::{Connector, Link};
use super::protocol::{
    encoded_len, BlockUpdate, CoordinatorMessage, Flush, WorkerId, WorkerMessage, MAX_KEY_SIZE,
    MESSAGE_BUDGET,
};
use crate::config::{ClusterLimitConfig, ColdStart};
use crate::error::{LimiterError, Result};
use crate::ratelimit::RateLimit;

/// Settings for a worker agent.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// How often shadow counters are flushed
    pub flush_interval: Duration,
    /// Coordinator broadcast period, used for the staleness bound
    pub broadcast_interval: Duration,
    /// Answer for unknown keys while the cache is untrusted
    pub cold_start: ColdStart,
    /// Base delay between reconnect attempts
    pub reconnect_backoff: Duration,
}

/// Staleness bounds a silent coordinator may miss before the session is
/// considered dead.
const LIVENESS_MISSES: u32 = 3;

impl WorkerOptions {
    /// Maximum lag of a trusted cache behind the coordinator.
    pub fn staleness_bound(&self) -> Duration {
        self.flush_interval + self.broadcast_interval
    }

    /// How long a session may go without any coordinator traffic.
    pub fn liveness_timeout(&self) -> Duration {
        self.staleness_bound() * LIVENESS_MISSES
    }
}

impl From<&ClusterLimitConfig> for WorkerOptions {
    fn from(config: &ClusterLimitConfig) -> Self {
        Self {
            flush_interval: config.flush_interval(),
            broadcast_interval: config.broadcast_interval(),
            cold_start: config.cold_start,
            reconnect_backoff: config.reconnect_backoff(),
        }
    }
}

/// Hits observed locally and not yet acknowledged by a successful flush.
#[derive(Debug, Default)]
struct Shadow {
    counts: HashMap<String, u64>,
    limits: HashMap<String, u64>,
}

/// Local copy of the coordinator's block set.
#[derive(Debug, Default)]
struct BlockCache {
    keys: HashSet<String>,
    /// A full snapshot arrived during the current session
    synced: bool,
    /// When the coordinator last confirmed the cache, heartbeats included
    fresh_at: Option<Instant>,
}

impl BlockCache {
    fn is_trusted(&self, bound: Duration) -> bool {
        self.fresh_at.is_some_and(|at| at.elapsed() <= bound)
    }
}

/// How a session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Disconnected,
    Shutdown,
}

/// Per-process agent answering limit checks from local state.
#[derive(Debug)]
pub struct Worker {
    id: WorkerId,
    options: WorkerOptions,
    shadow: Mutex<Shadow>,
    cache: RwLock<BlockCache>,
    connected: AtomicBool,
}

impl Worker {
    /// Create a worker with a random id.
    pub fn new(options: WorkerOptions) -> Self {
        Self::with_id(WorkerId::random(), options)
    }

    /// Create a worker with a fixed id.
    pub fn with_id(id: WorkerId, options: WorkerOptions) -> Self {
        Self {
            id,
            options,
            shadow: Mutex::new(Shadow::default()),
            cache: RwLock::new(BlockCache::default()),
            connected: AtomicBool::new(false),
        }
    }

    /// Create a worker from configuration and start its connection loop.
    pub async fn setup(
        config: &ClusterLimitConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<WorkerHandle> {
        config.validate()?;
        let worker = Arc::new(Self::new(WorkerOptions::from(config)));
        Ok(worker.spawn(connector))
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Whether a session with the coordinator is currently open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether a full snapshot has arrived since the current session began.
    pub fn is_synced(&self) -> bool {
        self.cache.read().synced
    }

    /// Whether the cache currently lists `key` as blocked.
    pub fn is_blocked(&self, key: &str) -> bool {
        self.cache.read().keys.contains(key)
    }

    /// Hits recorded for `key` that have not been flushed yet.
    pub fn pending(&self, key: &str) -> u64 {
        self.shadow.lock().counts.get(key).copied().unwrap_or(0)
    }

    /// Send the shadow counters to the coordinator without waiting.
    ///
    /// Large shadows go out as several messages, each within the frame
    /// limit. Exactly the hits of each enqueued message are subtracted;
    /// hits recorded meanwhile, and those of any message that could not be
    /// enqueued, stay pending. Fails only when nothing could be enqueued.
    /// Returns the number of hits sent.
    pub fn flush(&self, outbound: &mpsc::Sender<WorkerMessage>) -> Result<u64> {
        let flush = {
            let mut shadow = self.shadow.lock();
            self.reject_oversized_keys(&mut shadow);
            if shadow.counts.is_empty() {
                return Ok(0);
            }
            Flush {
                worker_id: self.id.clone(),
                increments: shadow.counts.clone(),
                limits: shadow.limits.clone(),
            }
        };

        let mut total = 0;
        for part in flush.split(MESSAGE_BUDGET) {
            let sent = part.increments.clone();
            let hits = part.total();

            if let Err(e) = outbound.try_send(WorkerMessage::Flush(part)) {
                let reason = match e {
                    TrySendError::Full(_) => "coordinator queue full",
                    TrySendError::Closed(_) => "coordinator link closed",
                };
                if total == 0 {
                    return Err(LimiterError::Channel(reason.into()));
                }
                debug!(worker_id = %self.id, sent = total, reason, "Partial flush");
                break;
            }

            self.subtract(sent);
            total += hits;
        }

        trace!(worker_id = %self.id, hits = total, "Flushed shadow counters");
        Ok(total)
    }

    fn subtract(&self, sent: HashMap<String, u64>) {
        let mut shadow = self.shadow.lock();
        let Shadow { counts, limits } = &mut *shadow;
        for (key, hits) in sent {
            if let Some(count) = counts.get_mut(&key) {
                *count = count.saturating_sub(hits);
                if *count == 0 {
                    counts.remove(&key);
                    limits.remove(&key);
                }
            }
        }
    }

    /// Discard keys too large to ever fit on the wire.
    fn reject_oversized_keys(&self, shadow: &mut Shadow) {
        let Shadow { counts, limits } = shadow;
        counts.retain(|key, hits| {
            if encoded_len(key) <= MAX_KEY_SIZE {
                return true;
            }
            warn!(
                worker_id = %self.id,
                key_len = key.len(),
                hits = *hits,
                "Discarding hits for key too large to report"
            );
            limits.remove(key);
            false
        });
    }

    /// Apply block decisions from the coordinator.
    ///
    /// Returns `false` when a delta arrives before this session's first
    /// snapshot; the caller should ask for a resync.
    pub fn apply_block_update(&self, update: BlockUpdate) -> bool {
        let lag_ms = update.age_ms();
        let heartbeat = update.is_empty();
        let mut cache = self.cache.write();

        if update.full {
            cache.keys = update.keys.into_iter().collect();
            cache.synced = true;
        } else {
            if !cache.synced {
                debug!(worker_id = %self.id, "Ignoring delta before snapshot");
                return false;
            }
            for key in update.unblocked {
                cache.keys.remove(&key);
            }
            cache.keys.extend(update.keys);
        }
        cache.fresh_at = Some(Instant::now());

        if heartbeat {
            trace!(worker_id = %self.id, lag_ms = lag_ms, "Coordinator heartbeat");
            return true;
        }
        debug!(
            worker_id = %self.id,
            full = update.full,
            blocked = cache.keys.len(),
            lag_ms = lag_ms,
            "Applied block update"
        );
        true
    }

    fn begin_session(&self) {
        self.cache.write().synced = false;
        self.connected.store(true, Ordering::Release);
    }

    fn end_session(&self) {
        self.cache.write().synced = false;
        self.connected.store(false, Ordering::Release);
    }

    fn reconnect_delay(&self) -> Duration {
        let base = self.options.reconnect_backoff;
        let jitter_ms = (base.as_millis() as u64) / 2;
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Start the connection loop.
    pub fn spawn(self: Arc<Self>, connector: Arc<dyn Connector>) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&self).run(connector, shutdown_rx));

        WorkerHandle {
            worker: self,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(
        self: Arc<Self>,
        connector: Arc<dyn Connector>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let connected = tokio::select! {
                result = connector.connect(&self.id) => result,
                _ = shutdown.changed() => return,
            };

            match connected {
                Ok(link) => {
                    info!(worker_id = %self.id, "Connected to coordinator");
                    let end = self.run_session(link, &mut shutdown).await;
                    self.end_session();
                    if end == SessionEnd::Shutdown {
                        return;
                    }
                    warn!(worker_id = %self.id, "Lost coordinator link");
                }
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "Failed to connect to coordinator");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay()) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn run_session(&self, link: Link, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        self.begin_session();
        let Link {
            outbound,
            mut inbound,
        } = link;

        let mut ticker = tokio::time::interval(self.options.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        let liveness_timeout = self.options.liveness_timeout();
        let mut last_heard = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if last_heard.elapsed() > liveness_timeout {
                        warn!(
                            worker_id = %self.id,
                            silent_ms = last_heard.elapsed().as_millis() as u64,
                            "Coordinator went silent, dropping session"
                        );
                        return SessionEnd::Disconnected;
                    }
                    if let Err(e) = self.flush(&outbound) {
                        warn!(worker_id = %self.id, error = %e, "Flush failed, retrying next tick");
                    }
                }
                message = inbound.recv() => match message {
                    Some(CoordinatorMessage::BlockUpdate(update)) => {
                        last_heard = Instant::now();
                        if !self.apply_block_update(update) {
                            let _ = outbound.try_send(WorkerMessage::Resync);
                        }
                    }
                    None => return SessionEnd::Disconnected,
                },
                _ = shutdown.changed() => {
                    if let Err(e) = self.flush(&outbound) {
                        debug!(worker_id = %self.id, error = %e, "Final flush failed");
                    }
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}

impl RateLimit for Worker {
    fn is_above_limit(&self, key: &str, limit: u64, increment: u64) -> bool {
        {
            let mut shadow = self.shadow.lock();
            match shadow.counts.get_mut(key) {
                Some(count) => *count = count.saturating_add(increment),
                None => {
                    shadow.counts.insert(key.to_string(), increment);
                }
            }
            shadow.limits.insert(key.to_string(), limit);
        }

        let cache = self.cache.read();
        if cache.keys.contains(key) {
            return true;
        }
        if !cache.is_trusted(self.options.staleness_bound()) {
            return self.options.cold_start.is_above_limit();
        }
        false
    }
}

/// Owns a worker's connection loop.
#[derive(Debug)]
pub struct WorkerHandle {
    worker: Arc<Worker>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Access the worker.
    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    /// Flush once more and stop the connection loop.
    pub async fn shutdown(self) {
        info!(worker_id = %self.worker.id, "Shutting down worker");
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl RateLimit for WorkerHandle {
    fn is_above_limit(&self, key: &str, limit: u64, increment: u64) -> bool {
        self.worker.is_above_limit(key, limit, increment)
    }
}
