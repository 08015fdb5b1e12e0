//! The coordinator: authoritative counters and block dissemination.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::link::Link;
use super::protocol::{
    BlockUpdate, CoordinatorMessage, Flush, WorkerId, WorkerMessage, MESSAGE_BUDGET,
};
use crate::config::{ClusterLimitConfig, LimiterOptions};
use crate::error::Result;
use crate::net::CoordinatorServer;
use crate::ratelimit::{LocalLimiter, MemoryLimiter, RateLimit};

/// Settings the coordinator needs at setup.
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Counting window of the authoritative limiter
    pub window_size: Duration,
    /// How often block decisions are recomputed and pushed
    pub broadcast_interval: Duration,
    /// Backing-store options for the authoritative limiter
    pub limiter: LimiterOptions,
    /// Capacity of each per-worker queue
    pub channel_capacity: usize,
}

impl From<&ClusterLimitConfig> for CoordinatorOptions {
    fn from(config: &ClusterLimitConfig) -> Self {
        Self {
            window_size: config.window_size(),
            broadcast_interval: config.broadcast_interval(),
            limiter: config.limiter.clone(),
            channel_capacity: config.channel_capacity,
        }
    }
}

/// A registered worker session.
#[derive(Debug)]
struct WorkerEntry {
    /// Generation of the session that owns this entry
    session: u64,
    /// Queue feeding the worker's link
    sender: mpsc::Sender<CoordinatorMessage>,
    /// Next update to this worker must be a full snapshot
    needs_full: bool,
}

/// Worker registry and the block set last disseminated to it.
///
/// Both live under one lock so a snapshot sent on attach and the deltas
/// computed on broadcast always start from the same set.
#[derive(Debug, Default)]
struct Registry {
    workers: HashMap<WorkerId, WorkerEntry>,
    blocked: BTreeSet<String>,
}

/// Authoritative source of per-key counts for the whole process group.
pub struct Coordinator {
    /// Authoritative counters
    limiter: Arc<dyn LocalLimiter>,
    /// Most recent limit reported for each key
    limits: DashMap<String, u64>,
    /// Connected workers
    registry: Mutex<Registry>,
    /// Source of session generations
    next_session: AtomicU64,
    options: CoordinatorOptions,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("tracked_limits", &self.limits.len())
            .field("options", &self.options)
            .finish()
    }
}

impl Coordinator {
    /// Initialize the authoritative limiter and return a ready coordinator.
    ///
    /// Fails with [`crate::LimiterError::Setup`] when the backing store cannot
    /// be opened.
    pub async fn setup(options: CoordinatorOptions) -> Result<Arc<Self>> {
        let limiter = MemoryLimiter::open(options.window_size, &options.limiter)?;
        Ok(Self::with_limiter(options, Arc::new(limiter)))
    }

    /// Build a coordinator around an already initialized limiter.
    pub fn with_limiter(options: CoordinatorOptions, limiter: Arc<dyn LocalLimiter>) -> Arc<Self> {
        info!(
            window_ms = options.window_size.as_millis() as u64,
            broadcast_interval_ms = options.broadcast_interval.as_millis() as u64,
            "Coordinator ready"
        );

        Arc::new(Self {
            limiter,
            limits: DashMap::new(),
            registry: Mutex::new(Registry::default()),
            next_session: AtomicU64::new(1),
            options,
        })
    }

    /// Register a worker session and return its link.
    ///
    /// A full snapshot of the current block set is queued before anything
    /// else. Attaching an id that is already registered replaces the older
    /// session.
    pub fn attach(self: &Arc<Self>, worker_id: WorkerId) -> Link {
        let capacity = self.options.channel_capacity.max(1);
        let (outbound, worker_rx) = mpsc::channel(capacity);
        let (worker_tx, inbound) = mpsc::channel(capacity);
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);

        {
            let mut registry = self.registry.lock();
            let snapshot = BlockUpdate::snapshot(registry.blocked.clone());
            let needs_full = deliver(&worker_tx, snapshot.split(MESSAGE_BUDGET)).is_err();

            let entry = WorkerEntry {
                session,
                sender: worker_tx,
                needs_full,
            };
            if registry.workers.insert(worker_id.clone(), entry).is_some() {
                info!(worker_id = %worker_id, "Replaced existing worker session");
            }

            info!(
                worker_id = %worker_id,
                session = session,
                workers = registry.workers.len(),
                blocked = registry.blocked.len(),
                "Worker attached"
            );
        }

        tokio::spawn(Arc::clone(self).run_session(worker_id, session, worker_rx));

        Link { outbound, inbound }
    }

    /// Drop a worker's registration, closing its inbound channel.
    pub fn disconnect(&self, worker_id: &WorkerId) -> bool {
        let removed = self.registry.lock().workers.remove(worker_id).is_some();
        if removed {
            info!(worker_id = %worker_id, "Worker disconnected");
        }
        removed
    }

    /// Apply a worker's messages in arrival order until its link closes.
    async fn run_session(
        self: Arc<Self>,
        worker_id: WorkerId,
        session: u64,
        mut messages: mpsc::Receiver<WorkerMessage>,
    ) {
        while let Some(message) = messages.recv().await {
            match message {
                WorkerMessage::Flush(flush) => {
                    self.record_increments(&worker_id, flush);
                }
                WorkerMessage::Resync => {
                    debug!(worker_id = %worker_id, "Worker requested resync");
                    self.request_snapshot(&worker_id);
                }
                WorkerMessage::Hello { .. } => {
                    debug!(worker_id = %worker_id, "Ignoring repeated hello");
                }
            }
        }

        self.detach(&worker_id, session);
    }

    fn detach(&self, worker_id: &WorkerId, session: u64) {
        let mut registry = self.registry.lock();
        let owned = registry
            .workers
            .get(worker_id)
            .is_some_and(|entry| entry.session == session);
        if owned {
            registry.workers.remove(worker_id);
            info!(
                worker_id = %worker_id,
                session = session,
                workers = registry.workers.len(),
                "Worker session closed"
            );
        }
    }

    /// Merge a worker's flushed increments into the authoritative counters.
    ///
    /// Flushes from workers that are no longer registered are dropped.
    /// Returns the number of hits applied.
    pub fn record_increments(&self, worker_id: &WorkerId, flush: Flush) -> u64 {
        if !self.registry.lock().workers.contains_key(worker_id) {
            warn!(
                worker_id = %worker_id,
                hits = flush.total(),
                "Dropping flush from unregistered worker"
            );
            return 0;
        }

        for (key, limit) in flush.limits {
            self.limits.insert(key, limit);
        }

        let mut applied = 0;
        for (key, hits) in flush.increments {
            if hits == 0 {
                continue;
            }
            let limit = self.limits.get(&key).map(|l| *l).unwrap_or(u64::MAX);
            match self.limiter.increment(&key, limit, hits) {
                Ok(_) => applied += hits,
                Err(e) => {
                    warn!(key = %key, hits = hits, error = %e, "Failed to record increments");
                }
            }
        }

        trace!(worker_id = %worker_id, hits = applied, "Recorded flush");
        applied
    }

    /// Evaluate every key with a known limit against its current count.
    ///
    /// Keys whose count has dropped to zero are forgotten until they are
    /// reported again.
    pub fn compute_block_set(&self) -> BTreeSet<String> {
        let mut blocked = BTreeSet::new();

        self.limits.retain(|key, limit| match self.limiter.count(key) {
            Ok(0) => false,
            Ok(count) => {
                if count >= *limit {
                    blocked.insert(key.clone());
                }
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read counter, treating as not blocked");
                true
            }
        });

        blocked
    }

    /// Push `blocked` to every registered worker.
    ///
    /// Workers get the delta against the previous broadcast, or a full
    /// snapshot when they are flagged for resync. An unchanged set still
    /// goes out as an empty heartbeat so workers can tell a quiet
    /// coordinator from a dead one. Returns how many workers were sent an
    /// update.
    pub fn broadcast(&self, blocked: BTreeSet<String>) -> usize {
        let mut registry = self.registry.lock();
        let Registry {
            workers,
            blocked: current,
        } = &mut *registry;

        let delta = BlockUpdate::delta(current, &blocked);
        let changed = delta.is_some();
        let parts = delta
            .unwrap_or_else(BlockUpdate::heartbeat)
            .split(MESSAGE_BUDGET);
        *current = blocked;

        let mut delivered = 0;
        let mut closed = Vec::new();

        for (worker_id, entry) in workers.iter_mut() {
            let update = if entry.needs_full {
                BlockUpdate::snapshot(current.clone()).split(MESSAGE_BUDGET)
            } else {
                parts.clone()
            };

            match deliver(&entry.sender, update) {
                Ok(()) => {
                    entry.needs_full = false;
                    delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    warn!(worker_id = %worker_id, "Worker queue full, scheduling resync");
                    entry.needs_full = true;
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(worker_id = %worker_id, "Worker link closed, skipping");
                    closed.push(worker_id.clone());
                }
            }
        }

        for worker_id in closed {
            workers.remove(&worker_id);
        }

        if changed {
            debug!(
                workers = delivered,
                blocked = current.len(),
                "Broadcast block update"
            );
        } else {
            trace!(workers = delivered, "Broadcast heartbeat");
        }
        delivered
    }

    /// Flag a worker for a full snapshot and try to send it right away.
    pub fn request_snapshot(&self, worker_id: &WorkerId) {
        let mut registry = self.registry.lock();
        let Registry { workers, blocked } = &mut *registry;
        if let Some(entry) = workers.get_mut(worker_id) {
            let snapshot = BlockUpdate::snapshot(blocked.clone());
            entry.needs_full = deliver(&entry.sender, snapshot.split(MESSAGE_BUDGET)).is_err();
        }
    }

    /// One timer tick: recompute, broadcast, and evict expired counters.
    pub fn tick(&self) -> usize {
        let blocked = self.compute_block_set();
        let delivered = self.broadcast(blocked);
        self.limiter.evict_expired();
        delivered
    }

    /// Start the broadcast timer.
    pub fn spawn(self: &Arc<Self>) -> CoordinatorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let coordinator = Arc::clone(self);
        let period = self.options.broadcast_interval;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        coordinator.tick();
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Broadcast loop stopping");
                        break;
                    }
                }
            }
        });

        CoordinatorHandle {
            coordinator: Arc::clone(self),
            shutdown: shutdown_tx,
            tasks: vec![task],
        }
    }

    /// Get the number of registered workers.
    pub fn worker_count(&self) -> usize {
        self.registry.lock().workers.len()
    }

    /// Whether a worker id is currently registered.
    pub fn is_registered(&self, worker_id: &WorkerId) -> bool {
        self.registry.lock().workers.contains_key(worker_id)
    }

    /// The block set most recently disseminated.
    pub fn blocked_keys(&self) -> BTreeSet<String> {
        self.registry.lock().blocked.clone()
    }

    /// Authoritative count for a key, zero when unknown or unreadable.
    pub fn count(&self, key: &str) -> u64 {
        self.limiter.count(key).unwrap_or(0)
    }

    /// Most recent limit reported for a key.
    pub fn known_limit(&self, key: &str) -> Option<u64> {
        self.limits.get(key).map(|l| *l)
    }
}

/// Queue every part of an update, stopping at the first refusal.
fn deliver(
    sender: &mpsc::Sender<CoordinatorMessage>,
    parts: Vec<BlockUpdate>,
) -> std::result::Result<(), TrySendError<()>> {
    for part in parts {
        sender
            .try_send(CoordinatorMessage::BlockUpdate(part))
            .map_err(|e| match e {
                TrySendError::Full(_) => TrySendError::Full(()),
                TrySendError::Closed(_) => TrySendError::Closed(()),
            })?;
    }
    Ok(())
}

impl RateLimit for Coordinator {
    fn is_above_limit(&self, key: &str, limit: u64, increment: u64) -> bool {
        self.limits.insert(key.to_string(), limit);
        match self.limiter.increment(key, limit, increment) {
            Ok(above) => above,
            Err(e) => {
                warn!(key = %key, error = %e, "Limiter backend failed, allowing request");
                false
            }
        }
    }
}

/// Owns the coordinator's background tasks.
#[derive(Debug)]
pub struct CoordinatorHandle {
    coordinator: Arc<Coordinator>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl CoordinatorHandle {
    /// Access the coordinator.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Accept worker connections on `listener` until shutdown.
    pub fn serve_tcp(&mut self, listener: TcpListener) {
        let coordinator = Arc::clone(&self.coordinator);
        let mut shutdown_rx = self.shutdown.subscribe();
        let task = tokio::spawn(async move {
            let signal = async move {
                let _ = shutdown_rx.changed().await;
            };
            let server = CoordinatorServer::new(listener, coordinator);
            if let Err(e) = server.serve_with_shutdown(signal).await {
                warn!(error = %e, "Coordinator server failed");
            }
        });
        self.tasks.push(task);
    }

    /// Stop the broadcast timer and any listener.
    pub async fn shutdown(self) {
        info!("Shutting down coordinator");
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

impl RateLimit for CoordinatorHandle {
    fn is_above_limit(&self, key: &str, limit: u64, increment: u64) -> bool {
        self.coordinator.is_above_limit(key, limit, increment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimiterError;

    fn options() -> CoordinatorOptions {
        CoordinatorOptions {
            window_size: Duration::from_secs(60),
            broadcast_interval: Duration::from_millis(20),
            limiter: LimiterOptions::default(),
            channel_capacity: 16,
        }
    }

    fn flush(worker: &str, entries: &[(&str, u64, u64)]) -> Flush {
        let mut flush = Flush {
            worker_id: WorkerId::new(worker),
            ..Default::default()
        };
        for (key, hits, limit) in entries {
            flush.increments.insert(key.to_string(), *hits);
            flush.limits.insert(key.to_string(), *limit);
        }
        flush
    }

    fn next_update(link: &mut Link) -> BlockUpdate {
        match link.inbound.try_recv() {
            Ok(CoordinatorMessage::BlockUpdate(update)) => update,
            Err(e) => panic!("expected a block update: {e}"),
        }
    }

    struct FailingLimiter;

    impl LocalLimiter for FailingLimiter {
        fn increment(&self, _key: &str, _limit: u64, _increment: u64) -> Result<bool> {
            Err(LimiterError::Backend("unreachable".into()))
        }

        fn count(&self, _key: &str) -> Result<u64> {
            Err(LimiterError::Backend("unreachable".into()))
        }

        fn evict_expired(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn test_setup_error() {
        let mut opts = options();
        opts.limiter.max_keys = 0;
        let result = Coordinator::setup(opts).await;
        assert!(matches!(result, Err(LimiterError::Setup(_))));
    }

    #[tokio::test]
    async fn test_attach_sends_full_snapshot() {
        let coordinator = Coordinator::setup(options()).await.unwrap();
        let mut link = coordinator.attach(WorkerId::new("w1"));

        let update = next_update(&mut link);
        assert!(update.full);
        assert!(update.keys.is_empty());
        assert_eq!(coordinator.worker_count(), 1);
    }

    #[tokio::test]
    async fn test_record_and_block() {
        let coordinator = Coordinator::setup(options()).await.unwrap();
        let w1 = WorkerId::new("w1");
        let mut link = coordinator.attach(w1.clone());
        next_update(&mut link);

        assert_eq!(coordinator.record_increments(&w1, flush("w1", &[("k", 4, 10)])), 4);
        assert!(coordinator.compute_block_set().is_empty());

        coordinator.record_increments(&w1, flush("w1", &[("k", 6, 10)]));
        assert_eq!(coordinator.count("k"), 10);
        assert_eq!(coordinator.known_limit("k"), Some(10));

        let blocked = coordinator.compute_block_set();
        assert!(blocked.contains("k"));

        assert_eq!(coordinator.broadcast(blocked), 1);
        assert!(coordinator.blocked_keys().contains("k"));
        let update = next_update(&mut link);
        assert!(!update.full);
        assert!(update.keys.contains("k"));
    }

    #[tokio::test]
    async fn test_unchanged_block_set_sends_heartbeat() {
        let coordinator = Coordinator::setup(options()).await.unwrap();
        let mut link = coordinator.attach(WorkerId::new("w1"));
        next_update(&mut link);

        let blocked: BTreeSet<String> = ["k".to_string()].into();
        assert_eq!(coordinator.broadcast(blocked.clone()), 1);
        assert_eq!(coordinator.broadcast(blocked), 1);

        assert!(next_update(&mut link).keys.contains("k"));
        assert!(next_update(&mut link).is_empty());
        assert!(link.inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_large_snapshot_arrives_in_parts() {
        let coordinator = Coordinator::setup(options()).await.unwrap();
        let blocked: BTreeSet<String> = (0..40_000)
            .map(|i| format!("tenant-{i:06}/api/v1/resource"))
            .collect();
        coordinator.broadcast(blocked.clone());

        let mut link = coordinator.attach(WorkerId::new("w1"));
        let first = next_update(&mut link);
        assert!(first.full);

        let mut rebuilt: BTreeSet<String> = first.keys;
        while let Ok(CoordinatorMessage::BlockUpdate(part)) = link.inbound.try_recv() {
            assert!(!part.full);
            rebuilt.extend(part.keys);
        }
        assert_eq!(rebuilt, blocked);
    }

    #[tokio::test]
    async fn test_unblock_delta() {
        let coordinator = Coordinator::setup(options()).await.unwrap();
        let mut link = coordinator.attach(WorkerId::new("w1"));
        next_update(&mut link);

        coordinator.broadcast(["a".to_string(), "b".to_string()].into());
        next_update(&mut link);
        coordinator.broadcast(["b".to_string()].into());

        let update = next_update(&mut link);
        assert!(update.keys.is_empty());
        assert!(update.unblocked.contains("a"));
    }

    #[tokio::test]
    async fn test_late_attach_gets_current_blocks() {
        let coordinator = Coordinator::setup(options()).await.unwrap();
        coordinator.broadcast(["x".to_string()].into());

        let mut link = coordinator.attach(WorkerId::new("late"));
        let update = next_update(&mut link);
        assert!(update.full);
        assert!(update.keys.contains("x"));
    }

    #[tokio::test]
    async fn test_flush_from_unknown_worker_dropped() {
        let coordinator = Coordinator::setup(options()).await.unwrap();
        let ghost = WorkerId::new("ghost");

        assert_eq!(coordinator.record_increments(&ghost, flush("ghost", &[("k", 5, 10)])), 0);
        assert_eq!(coordinator.count("k"), 0);
    }

    #[tokio::test]
    async fn test_full_queue_schedules_resync() {
        let mut opts = options();
        opts.channel_capacity = 1;
        let coordinator = Coordinator::setup(opts).await.unwrap();
        let mut link = coordinator.attach(WorkerId::new("w1"));

        // Snapshot still queued, so the delta cannot fit
        assert_eq!(coordinator.broadcast(["a".to_string()].into()), 0);
        next_update(&mut link);

        // Nothing changed, but the worker is owed a snapshot
        assert_eq!(coordinator.broadcast(["a".to_string()].into()), 1);
        let update = next_update(&mut link);
        assert!(update.full);
        assert!(update.keys.contains("a"));
    }

    #[tokio::test]
    async fn test_closed_link_unregisters() {
        let coordinator = Coordinator::setup(options()).await.unwrap();
        let link = coordinator.attach(WorkerId::new("w1"));
        drop(link.inbound);

        coordinator.broadcast(["a".to_string()].into());
        assert_eq!(coordinator.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_session_flushes_apply_in_order() {
        let coordinator = Coordinator::setup(options()).await.unwrap();
        let link = coordinator.attach(WorkerId::new("w1"));

        for _ in 0..5 {
            link.outbound
                .send(WorkerMessage::Flush(flush("w1", &[("k", 2, 100)])))
                .await
                .unwrap();
        }
        drop(link.outbound);

        // The session applies everything, then detaches
        for _ in 0..50 {
            if coordinator.worker_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(coordinator.count("k"), 10);
        assert_eq!(coordinator.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_session_does_not_detach_replacement() {
        let coordinator = Coordinator::setup(options()).await.unwrap();
        let w1 = WorkerId::new("w1");

        let first = coordinator.attach(w1.clone());
        let _second = coordinator.attach(w1.clone());
        drop(first);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(coordinator.is_registered(&w1));
    }

    #[tokio::test]
    async fn test_resync_request() {
        let coordinator = Coordinator::setup(options()).await.unwrap();
        let mut link = coordinator.attach(WorkerId::new("w1"));
        next_update(&mut link);

        link.outbound.send(WorkerMessage::Resync).await.unwrap();
        let update = tokio::time::timeout(Duration::from_secs(1), link.inbound.recv())
            .await
            .unwrap();
        assert!(matches!(update, Some(CoordinatorMessage::BlockUpdate(u)) if u.full));
    }

    #[tokio::test]
    async fn test_backend_errors_fail_open() {
        let coordinator = Coordinator::with_limiter(options(), Arc::new(FailingLimiter));
        let w1 = WorkerId::new("w1");
        let _link = coordinator.attach(w1.clone());

        assert!(!coordinator.is_above_limit("k", 1, 100));
        assert_eq!(coordinator.record_increments(&w1, flush("w1", &[("k", 5, 1)])), 0);
        assert!(coordinator.compute_block_set().is_empty());
    }

    #[tokio::test]
    async fn test_direct_checks_are_authoritative() {
        let coordinator = Coordinator::setup(options()).await.unwrap();

        for _ in 0..3 {
            assert!(!coordinator.check("k", 3));
        }
        assert!(coordinator.check("k", 3));
        assert!(coordinator.compute_block_set().contains("k"));
    }

    #[tokio::test]
    async fn test_expired_keys_forgotten() {
        let mut opts = options();
        opts.window_size = Duration::from_millis(20);
        let coordinator = Coordinator::setup(opts).await.unwrap();

        coordinator.is_above_limit("k", 1, 5);
        assert!(coordinator.compute_block_set().contains("k"));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(coordinator.compute_block_set().is_empty());
        assert_eq!(coordinator.known_limit("k"), None);
    }

    #[tokio::test]
    async fn test_timer_loop_broadcasts() {
        let coordinator = Coordinator::setup(options()).await.unwrap();
        let handle = coordinator.spawn();
        let mut link = coordinator.attach(WorkerId::new("w1"));
        next_update(&mut link);

        coordinator.is_above_limit("k", 1, 2);

        let blocked = tokio::time::timeout(Duration::from_secs(1), async {
            while let Some(CoordinatorMessage::BlockUpdate(update)) = link.inbound.recv().await {
                if update.keys.contains("k") {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(blocked);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_timer_loop_sends_heartbeats() {
        let coordinator = Coordinator::setup(options()).await.unwrap();
        let handle = coordinator.spawn();
        let mut link = coordinator.attach(WorkerId::new("w1"));
        next_update(&mut link);

        for _ in 0..3 {
            let update = tokio::time::timeout(Duration::from_secs(1), link.inbound.recv())
                .await
                .unwrap();
            assert!(matches!(update, Some(CoordinatorMessage::BlockUpdate(u)) if u.is_empty()));
        }

        handle.shutdown().await;
    }
}
