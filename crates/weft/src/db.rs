//! Store handle used by collaborators
//!
//! One [`WeftStore`] per store per process. It owns the process's serializer
//! (and through it the write connection), the in-memory caches, the merger
//! and the pruner, and wires them to the change signal.

use crate::cache::{CacheSnapshot, CacheViews, LiveCache};
use crate::signal::SignalHub;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use weft_core::config::WeftConfig;
use weft_core::error::Result;
use weft_core::serializer::{Pending, Serializer, Turn};
use weft_core::traits::{
    CacheSink, ChangeSignal, CheckpointRegistry, Clock, SubscriptionId, SystemClock,
};
use weft_core::types::{
    ChangeKind, Checkpoint, ConsumerIdentity, ObjectId, ObjectKey, ObjectKind, SequenceId,
    StoreId,
};
use weft_history::{HistoryMerger, HistoryPruner, MergeStats, PruneStats};
use weft_sqlite::{ExecutionContext, StoreConnection};

/// How `wipe_store` removes one kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionStrategy {
    /// One statement for the whole kind; one kind-wide log record
    Bulk,
    /// Object by object, with one log record per object
    PerObject,
}

/// Kinds removed by `wipe_store`, in order
pub type WipePlan = &'static [(ObjectKind, DeletionStrategy)];

/// Everything a store handle needs from its environment
pub struct WeftOptions {
    pub store: StoreId,
    pub consumer: ConsumerIdentity,
    pub registry: Arc<dyn CheckpointRegistry>,
    pub clock: Arc<dyn Clock>,
    pub signal: Arc<dyn ChangeSignal>,
    pub config: WeftConfig,
    pub wipe_plan: WipePlan,
}

impl WeftOptions {
    /// Options with the system clock, a private in-process signal hub and an
    /// empty wipe plan
    pub fn new(
        store: StoreId,
        consumer: ConsumerIdentity,
        config: WeftConfig,
        registry: Arc<dyn CheckpointRegistry>,
    ) -> Self {
        Self {
            store,
            consumer,
            registry,
            clock: Arc::new(SystemClock),
            signal: Arc::new(SignalHub::new()),
            config,
            wipe_plan: &[],
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_signal(mut self, signal: Arc<dyn ChangeSignal>) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_wipe_plan(mut self, plan: WipePlan) -> Self {
        self.wipe_plan = plan;
        self
    }
}

/// Point-in-time health of a store as seen from one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatus {
    pub store: StoreId,
    pub consumer: ConsumerIdentity,
    /// Highest sequence id ever assigned
    pub tail: SequenceId,
    /// Lowest retained sequence id
    pub oldest: Option<SequenceId>,
    /// Retained log entries
    pub entries: u64,
    /// Every consumer's checkpoint, `None` if it never ran
    pub checkpoints: Vec<(ConsumerIdentity, Option<Checkpoint>)>,
    /// How far this consumer is behind the tail
    pub lag: u64,
}

/// State shared between the handle and the work it queues
struct Replica {
    store: StoreId,
    consumer: ConsumerIdentity,
    merger: HistoryMerger,
    pruner: HistoryPruner,
    views: CacheViews,
    signal: Arc<dyn ChangeSignal>,
    registry: Arc<dyn CheckpointRegistry>,
    prune_owner: ConsumerIdentity,
    merge_queued: AtomicBool,
}

impl Replica {
    /// Open a context, run `block`, commit, then publish the changes
    fn mutate<T>(
        &self,
        turn: &Turn<'_, StoreConnection>,
        block: impl FnOnce(&ExecutionContext<'_>) -> Result<T>,
    ) -> Result<T> {
        let ctx = turn.resource().begin()?;
        let outermost = ctx.level() == 0;
        let value = block(&ctx)?;
        let committed = ctx.commit()?;

        // Nested contexts hand their ops to the enclosing context
        if outermost && !committed.ops.is_empty() {
            self.views.apply(&committed.ops);
            self.signal.post(self.store);
        }
        Ok(value)
    }

    /// Merge until nothing is left, then prune if this consumer owns pruning
    fn sync(&self, conn: &StoreConnection) -> Result<MergeStats> {
        let stats = self.merger.merge_to_quiescence(conn, &self.views)?;
        if stats.merged && self.prune_owner == self.consumer {
            self.prune_logged(conn);
        }
        Ok(stats)
    }

    fn prune_logged(&self, conn: &StoreConnection) {
        if let Err(e) = self.pruner.prune(conn) {
            tracing::error!(store = %self.store, error = %e, "Prune pass failed");
        }
    }

    fn status(&self, conn: &StoreConnection) -> Result<StoreStatus> {
        let stats = conn.log_stats()?;
        let checkpoints = self
            .registry
            .all_consumers(self.store)
            .iter()
            .map(|&consumer| Ok((consumer, self.registry.get(self.store, consumer)?)))
            .collect::<Result<Vec<_>>>()?;
        let mine = checkpoints
            .iter()
            .find(|(consumer, _)| *consumer == self.consumer)
            .and_then(|(_, checkpoint)| checkpoint.as_ref())
            .map_or(0, |c| c.seq);

        Ok(StoreStatus {
            store: self.store,
            consumer: self.consumer,
            tail: stats.tail,
            oldest: stats.oldest,
            entries: stats.count,
            checkpoints,
            lag: stats.tail.saturating_sub(mine),
        })
    }
}

/// Shared-store handle for one process.
///
/// Mutations go through the process's serializer and complete through a
/// [`Pending`]; reads are served from the in-memory cache.
pub struct WeftStore {
    replica: Arc<Replica>,
    serializer: Serializer<StoreConnection>,
    cache: Arc<LiveCache>,
    config: WeftConfig,
    wipe_plan: WipePlan,
    subscription: Mutex<Option<SubscriptionId>>,
    wake: Notify,
    stopped: AtomicBool,
}

impl WeftStore {
    /// Open the store, load this process's cache and subscribe to changes.
    ///
    /// A consumer without a checkpoint starts at the log tail: the cache is
    /// loaded from the same snapshot the tail is read from.
    pub fn open(options: WeftOptions) -> Result<Arc<Self>> {
        let WeftOptions {
            store,
            consumer,
            registry,
            clock,
            signal,
            config,
            wipe_plan,
        } = options;

        let store_config = config.store.clone();
        let conn_clock = clock.clone();
        let serializer = Serializer::spawn(
            format!("weft-{}-{}", store, consumer),
            move || Ok(StoreConnection::open(store, consumer, &store_config, conn_clock)?),
        )?;

        let replica = Arc::new(Replica {
            store,
            consumer,
            merger: HistoryMerger::new(
                store,
                consumer,
                registry.clone(),
                clock,
                config.merger.clone(),
            ),
            pruner: HistoryPruner::new(store, registry.clone()),
            views: CacheViews::new(),
            signal: signal.clone(),
            registry,
            prune_owner: config.sync.prune.owner,
            merge_queued: AtomicBool::new(false),
        });

        let loader = replica.clone();
        let snapshot = serializer.enqueue_sync_if_needed(move |turn| {
            let conn = turn.resource();
            let (tail, committed_at, objects) = conn.read(|view| {
                let tail = view.tail()?;
                Ok((tail, view.committed_at(tail)?, view.load_all()?))
            })?;
            loader
                .merger
                .ensure_checkpoint(tail, committed_at, conn.generation())?;
            Ok(CacheSnapshot::from_objects(objects))
        })?;

        let cache = Arc::new(LiveCache::new(snapshot));
        replica.views.register(&cache);

        let handle = Arc::new(Self {
            replica,
            serializer,
            cache,
            config,
            wipe_plan,
            subscription: Mutex::new(None),
            wake: Notify::new(),
            stopped: AtomicBool::new(false),
        });

        let weak: Weak<WeftStore> = Arc::downgrade(&handle);
        let id = signal.subscribe(
            store,
            Arc::new(move || {
                if let Some(handle) = weak.upgrade() {
                    handle.schedule_merge();
                }
            }),
        );
        *handle.subscription.lock() = Some(id);

        tracing::info!(
            store = %store,
            consumer = %consumer,
            objects = handle.cache.snapshot().len(),
            "Opened weft store"
        );
        Ok(handle)
    }

    pub fn store(&self) -> StoreId {
        self.replica.store
    }

    pub fn consumer(&self) -> ConsumerIdentity {
        self.replica.consumer
    }

    pub fn config(&self) -> &WeftConfig {
        &self.config
    }

    /// Latest cache contents
    pub fn snapshot(&self) -> CacheSnapshot {
        self.cache.snapshot()
    }

    /// Run `block` against the current snapshot, on the calling thread
    pub fn perform_read<T>(&self, block: impl FnOnce(&CacheSnapshot) -> T) -> T {
        block(&self.cache.snapshot())
    }

    /// Queue `block` to run in its own execution context and commit it.
    ///
    /// If `block` fails the context is rolled back and nothing is published.
    ///
    /// The queued work cannot start while another mutation of this store is
    /// running, so waiting on the returned [`Pending`] from inside one fails
    /// with [`WeftError::WaitInsideTurn`](weft_core::WeftError::WaitInsideTurn)
    /// instead of blocking the worker on itself. Nested callers must use
    /// [`WeftStore::perform_mutation_and_wait`], which runs inline.
    pub fn perform_mutation<T, F>(&self, block: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&ExecutionContext<'_>) -> Result<T> + Send + 'static,
    {
        let replica = self.replica.clone();
        self.serializer
            .enqueue_async(move |turn| replica.mutate(turn, block))
    }

    /// Like [`WeftStore::perform_mutation`] but blocks until committed.
    ///
    /// Called from inside another mutation of this store it runs inline as a
    /// nested context. Must not be called from an async task.
    pub fn perform_mutation_and_wait<T, F>(&self, block: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ExecutionContext<'_>) -> Result<T> + Send + 'static,
    {
        let replica = self.replica.clone();
        self.serializer
            .enqueue_sync_if_needed(move |turn| replica.mutate(turn, block))
    }

    pub fn upsert(
        &self,
        kind: ObjectKind,
        id: impl Into<ObjectId>,
        payload: impl Into<Vec<u8>>,
    ) -> Pending<ChangeKind> {
        let key = ObjectKey::new(kind, id);
        let payload = payload.into();
        self.perform_mutation(move |ctx| Ok(ctx.put(&key, &payload)?))
    }

    pub fn upsert_json<T: Serialize>(
        &self,
        kind: ObjectKind,
        id: impl Into<ObjectId>,
        value: &T,
    ) -> Pending<ChangeKind> {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.upsert(kind, id, bytes),
            Err(e) => Pending::ready(Err(e.into())),
        }
    }

    /// Delete one object; resolves to whether it existed
    pub fn delete(&self, kind: ObjectKind, id: impl Into<ObjectId>) -> Pending<bool> {
        let key = ObjectKey::new(kind, id);
        self.perform_mutation(move |ctx| Ok(ctx.delete(&key)?))
    }

    /// Delete every object of `kind` without loading them.
    ///
    /// Every open cache view of this process drops the kind as soon as the
    /// commit lands; other processes follow after their next merge.
    pub fn delete_all(&self, kind: ObjectKind) -> Pending<usize> {
        self.perform_mutation(move |ctx| Ok(ctx.delete_kind(&kind)?))
    }

    /// Remove every kind in the wipe plan, in order, in one transaction.
    ///
    /// Resolves to the number of objects deleted.
    pub fn wipe_store(&self) -> Pending<usize> {
        let plan = self.wipe_plan;
        self.perform_mutation(move |ctx| {
            let mut deleted = 0;
            for (kind, strategy) in plan {
                deleted += match strategy {
                    DeletionStrategy::Bulk => ctx.delete_kind(kind)?,
                    DeletionStrategy::PerObject => {
                        let mut removed = 0;
                        for id in ctx.ids(kind)? {
                            if ctx.delete(&ObjectKey::new(kind.clone(), id))? {
                                removed += 1;
                            }
                        }
                        removed
                    }
                };
            }
            Ok(deleted)
        })
    }

    /// Open another in-process cache of this store.
    ///
    /// The view is seeded from the store and from then on receives local
    /// commits, merges and bulk deletes. It stops receiving updates once the
    /// returned `Arc` is dropped.
    pub fn open_view(&self) -> Pending<Arc<LiveCache>> {
        let replica = self.replica.clone();
        self.serializer.enqueue_async(move |turn| {
            let objects = turn.resource().read(|view| view.load_all())?;
            let view = Arc::new(LiveCache::new(CacheSnapshot::from_objects(objects)));
            replica.views.register(&view);
            Ok(view)
        })
    }

    /// Merge every pending log entry now (and prune, for the prune owner)
    pub fn merge_now(&self) -> Pending<MergeStats> {
        let replica = self.replica.clone();
        self.serializer
            .enqueue_async(move |turn| replica.sync(turn.resource()))
    }

    /// Run one prune pass regardless of the prune schedule
    pub fn prune_now(&self) -> Pending<PruneStats> {
        let replica = self.replica.clone();
        self.serializer
            .enqueue_async(move |turn| replica.pruner.prune(turn.resource()))
    }

    /// Call when the process comes back from suspension.
    ///
    /// Signals posted while suspended may have been lost, so this merges
    /// unconditionally.
    pub fn on_resume(&self) -> Pending<MergeStats> {
        tracing::debug!(store = %self.store(), consumer = %self.consumer(), "Resumed");
        self.merge_now()
    }

    pub fn status(&self) -> Pending<StoreStatus> {
        let replica = self.replica.clone();
        self.serializer
            .enqueue_async(move |turn| replica.status(turn.resource()))
    }

    /// Queue a merge unless one is already queued
    fn schedule_merge(&self) {
        if self.replica.merge_queued.swap(true, Ordering::SeqCst) {
            return;
        }

        let replica = self.replica.clone();
        let pending = self.serializer.enqueue_async(move |turn| {
            replica.merge_queued.store(false, Ordering::SeqCst);
            let result = replica.sync(turn.resource());
            if let Err(e) = &result {
                tracing::error!(
                    store = %replica.store,
                    consumer = %replica.consumer,
                    error = %e,
                    "Background merge failed"
                );
            }
            result
        });
        drop(pending);
    }

    fn schedule_prune(&self) {
        let replica = self.replica.clone();
        drop(self.serializer.enqueue_async(move |turn| {
            replica.prune_logged(turn.resource());
            Ok(())
        }));
    }

    /// Polling backstop for lost signals.
    ///
    /// Merges every `poll_interval_ms`; the prune owner also prunes every
    /// `prune.interval_ms`. Returns after [`WeftStore::shutdown`].
    pub async fn run_sync_loop(self: Arc<Self>) {
        let poll = Duration::from_millis(self.config.sync.poll_interval_ms.max(1));
        let prune_every = Duration::from_millis(self.config.sync.prune.interval_ms.max(1));
        let prunes = self.replica.prune_owner == self.replica.consumer;

        let mut prune_tick =
            tokio::time::interval_at(tokio::time::Instant::now() + prune_every, prune_every);
        prune_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::debug!(
            store = %self.store(),
            consumer = %self.consumer(),
            poll_ms = poll.as_millis() as u64,
            prunes,
            "Sync loop started"
        );

        while !self.stopped.load(Ordering::SeqCst) {
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(poll) => self.schedule_merge(),
                _ = prune_tick.tick(), if prunes => self.schedule_prune(),
            }
        }

        tracing::debug!(store = %self.store(), consumer = %self.consumer(), "Sync loop stopped");
    }

    /// Stop the sync loop, unsubscribe from signals and drain queued work
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.wake.notify_one();

        if let Some(id) = self.subscription.lock().take() {
            self.replica.signal.unsubscribe(id);
        }
        self.serializer.shutdown();

        tracing::info!(store = %self.store(), consumer = %self.consumer(), "Weft store shut down");
    }
}

impl Drop for WeftStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
