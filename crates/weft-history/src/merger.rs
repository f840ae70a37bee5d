use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use weft_core::config::MergerConfig;
use weft_core::error::{MergeError, Result, StoreError, WeftError};
use weft_core::observe;
use weft_core::traits::{CacheSink, CheckpointRegistry, Clock};
use weft_core::types::{
    CacheOp, ChangeTarget, Checkpoint, ConsumerIdentity, ObjectKey, ObjectKind, Payload,
    SequenceId, StoreId,
};
use weft_sqlite::{ReadView, StoreConnection};

/// Tails the shared log on behalf of one consumer
pub struct HistoryMerger {
    store: StoreId,
    consumer: ConsumerIdentity,
    registry: Arc<dyn CheckpointRegistry>,
    clock: Arc<dyn Clock>,
    config: MergerConfig,
}

/// Outcome of one merge pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Entries from other consumers folded into the cache
    pub entries_applied: usize,
    /// Entries this consumer wrote itself (already in its cache)
    pub entries_skipped_own: usize,
    /// Entries that could not be decoded and were skipped
    pub entries_corrupt: usize,
    /// Checkpoint after the pass
    pub new_checkpoint: SequenceId,
    /// Whether any entries were processed and the checkpoint moved
    pub merged: bool,
    /// Whether this pass created the consumer's first checkpoint
    pub checkpoint_initialized: bool,
    /// Whether the checkpoint pointed into a replaced store file and the
    /// cache was reloaded from scratch
    pub store_rebuilt: bool,
    pub duration: Duration,
}

impl MergeStats {
    fn idle(checkpoint: SequenceId, started: Instant) -> Self {
        Self {
            new_checkpoint: checkpoint,
            duration: started.elapsed(),
            ..Self::default()
        }
    }

    pub fn entries_processed(&self) -> usize {
        self.entries_applied + self.entries_skipped_own + self.entries_corrupt
    }

    fn absorb(&mut self, pass: MergeStats) {
        self.entries_applied += pass.entries_applied;
        self.entries_skipped_own += pass.entries_skipped_own;
        self.entries_corrupt += pass.entries_corrupt;
        self.new_checkpoint = pass.new_checkpoint;
        self.merged |= pass.merged;
        self.checkpoint_initialized |= pass.checkpoint_initialized;
        self.store_rebuilt |= pass.store_rebuilt;
        self.duration += pass.duration;
    }
}

/// Entries of one batch, resolved against a single store snapshot
#[derive(Default)]
struct Batch {
    ops: Vec<CacheOp>,
    last_seq: Option<SequenceId>,
    last_committed_at: Option<DateTime<Utc>>,
    applied: usize,
    skipped_own: usize,
    corrupt: usize,
}

/// What one snapshot read found
enum Pass {
    Entries(Batch),
    /// The checkpoint does not belong to the store file as it is now
    Rebuilt {
        tail: SequenceId,
        committed_at: Option<DateTime<Utc>>,
        objects: Vec<(ObjectKey, Payload)>,
    },
}

impl HistoryMerger {
    pub fn new(
        store: StoreId,
        consumer: ConsumerIdentity,
        registry: Arc<dyn CheckpointRegistry>,
        clock: Arc<dyn Clock>,
        config: MergerConfig,
    ) -> Self {
        Self {
            store,
            consumer,
            registry,
            clock,
            config,
        }
    }

    pub fn store(&self) -> StoreId {
        self.store
    }

    pub fn consumer(&self) -> ConsumerIdentity {
        self.consumer
    }

    /// This consumer's stored checkpoint
    pub fn checkpoint(&self) -> Result<Option<Checkpoint>> {
        self.registry
            .get(self.store, self.consumer)
            .map_err(|e| self.unavailable(e))
    }

    /// Create the checkpoint at `tail` unless a current one exists.
    ///
    /// A checkpoint taken against another generation of the store file, or
    /// one past `tail`, is replaced. Returns whether a checkpoint was
    /// written. A consumer starting fresh loads the full store contents, so
    /// everything up to the tail is already reflected in its cache.
    pub fn ensure_checkpoint(
        &self,
        tail: SequenceId,
        committed_at: Option<DateTime<Utc>>,
        generation: &str,
    ) -> Result<bool> {
        let existing = self.checkpoint()?;
        if let Some(current) = &existing {
            if current.is_current(generation, tail) {
                return Ok(false);
            }
        }

        let checkpoint =
            Checkpoint::new(tail, committed_at, self.clock.now()).with_generation(generation);
        let written = self
            .registry
            .set(self.store, self.consumer, checkpoint)
            .map_err(|e| self.unavailable(e))?;

        match existing {
            Some(stale) => tracing::warn!(
                store = %self.store,
                consumer = %self.consumer,
                stale = stale.seq,
                seq = tail,
                generation,
                "Store file was replaced, reset checkpoint to log tail"
            ),
            None => tracing::info!(
                store = %self.store,
                consumer = %self.consumer,
                seq = tail,
                "Initialized checkpoint at log tail"
            ),
        }
        Ok(written)
    }

    /// Fold at most one batch of new log entries into `sink`.
    ///
    /// Must run inside the serializer turn that owns `conn`, outside any
    /// open execution context.
    pub fn merge(&self, conn: &StoreConnection, sink: &dyn CacheSink) -> Result<MergeStats> {
        let started = Instant::now();

        let checkpoint = match self.checkpoint()? {
            Some(checkpoint) => checkpoint,
            None => {
                let (tail, committed_at) = conn.read(|view| {
                    let tail = view.tail()?;
                    Ok((tail, view.committed_at(tail)?))
                })?;
                let created = self.ensure_checkpoint(tail, committed_at, conn.generation())?;
                return Ok(MergeStats {
                    checkpoint_initialized: created,
                    ..MergeStats::idle(tail, started)
                });
            }
        };

        let generation = conn.generation();
        let pass = conn.read(|view| {
            let tail = view.tail()?;
            if !checkpoint.is_current(generation, tail) {
                return Ok(Pass::Rebuilt {
                    tail,
                    committed_at: view.committed_at(tail)?,
                    objects: view.load_all()?,
                });
            }
            self.collect(view, checkpoint.seq).map(Pass::Entries)
        })?;

        let batch = match pass {
            Pass::Entries(batch) => batch,
            Pass::Rebuilt {
                tail,
                committed_at,
                objects,
            } => {
                return self.reload(
                    sink,
                    &checkpoint,
                    tail,
                    committed_at,
                    objects,
                    started,
                    generation,
                )
            }
        };

        let Some(last_seq) = batch.last_seq else {
            return Ok(MergeStats::idle(checkpoint.seq, started));
        };

        if !batch.ops.is_empty() {
            sink.apply(&batch.ops);
        }

        let advanced = Checkpoint::new(last_seq, batch.last_committed_at, self.clock.now())
            .with_generation(generation);
        self.registry
            .set(self.store, self.consumer, advanced)
            .map_err(|e| self.unavailable(e))?;

        let stats = MergeStats {
            entries_applied: batch.applied,
            entries_skipped_own: batch.skipped_own,
            entries_corrupt: batch.corrupt,
            new_checkpoint: last_seq,
            merged: true,
            checkpoint_initialized: false,
            store_rebuilt: false,
            duration: started.elapsed(),
        };

        observe::record_merge(
            stats.duration,
            stats.entries_applied as u64,
            stats.entries_corrupt as u64,
        );
        tracing::debug!(
            store = %self.store,
            consumer = %self.consumer,
            from = checkpoint.seq,
            to = last_seq,
            applied = stats.entries_applied,
            skipped_own = stats.entries_skipped_own,
            corrupt = stats.entries_corrupt,
            ops = batch.ops.len(),
            "Merged log entries"
        );

        Ok(stats)
    }

    /// Read at most one batch of entries after `after` and resolve the
    /// objects they touched against the same snapshot
    fn collect(
        &self,
        view: &ReadView<'_>,
        after: SequenceId,
    ) -> std::result::Result<Batch, StoreError> {
        let rows = view.entries_after(after, self.config.batch_entries_max)?;
        let mut batch = Batch::default();
        let mut touched: BTreeSet<ObjectKey> = BTreeSet::new();
        let mut cleared: Vec<ObjectKind> = Vec::new();

        for row in &rows {
            batch.last_seq = Some(row.seq);
            batch.last_committed_at = None;

            let entry = match row.decode() {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        store = %self.store,
                        consumer = %self.consumer,
                        seq = row.seq,
                        error = %e,
                        "Skipping corrupt log entry"
                    );
                    batch.corrupt += 1;
                    continue;
                }
            };
            batch.last_committed_at = Some(entry.committed_at);

            if entry.author == self.consumer {
                batch.skipped_own += 1;
                continue;
            }

            for change in entry.changes {
                match change.target {
                    ChangeTarget::Object(key) => {
                        touched.insert(key);
                    }
                    ChangeTarget::Kind { kind } => {
                        if !cleared.contains(&kind) {
                            cleared.push(kind);
                        }
                    }
                }
            }
            batch.applied += 1;
        }

        // Rows are read from the same snapshot as the log entries, so
        // the refreshed state is at least as new as the last entry.
        let mut reloaded: HashSet<ObjectKey> = HashSet::new();
        for kind in cleared {
            batch.ops.push(CacheOp::ClearKind { kind: kind.clone() });
            for (key, payload) in view.load_kind(&kind)? {
                reloaded.insert(key.clone());
                batch.ops.push(CacheOp::Upsert { key, payload });
            }
        }
        for key in touched {
            if reloaded.contains(&key) {
                continue;
            }
            match view.load_object(&key)? {
                Some(payload) => batch.ops.push(CacheOp::Upsert { key, payload }),
                None => batch.ops.push(CacheOp::Remove { key }),
            }
        }

        Ok(batch)
    }

    /// Replace the sink's contents with a full load of the store and move
    /// the checkpoint to the tail of the current generation
    #[allow(clippy::too_many_arguments)]
    fn reload(
        &self,
        sink: &dyn CacheSink,
        stale: &Checkpoint,
        tail: SequenceId,
        committed_at: Option<DateTime<Utc>>,
        objects: Vec<(ObjectKey, Payload)>,
        started: Instant,
        generation: &str,
    ) -> Result<MergeStats> {
        tracing::warn!(
            store = %self.store,
            consumer = %self.consumer,
            stale = stale.seq,
            tail,
            generation,
            objects = objects.len(),
            "Checkpoint does not match store file, reloading cache"
        );

        let mut ops = Vec::with_capacity(objects.len() + 1);
        ops.push(CacheOp::ClearAll);
        ops.extend(
            objects
                .into_iter()
                .map(|(key, payload)| CacheOp::Upsert { key, payload }),
        );
        sink.apply(&ops);

        let reset =
            Checkpoint::new(tail, committed_at, self.clock.now()).with_generation(generation);
        let written = self
            .registry
            .set(self.store, self.consumer, reset)
            .map_err(|e| self.unavailable(e))?;

        Ok(MergeStats {
            store_rebuilt: true,
            // An unwritten reset would be found stale again on every pass
            merged: written,
            ..MergeStats::idle(tail, started)
        })
    }

    /// Merge batch after batch until no entries are left
    pub fn merge_to_quiescence(
        &self,
        conn: &StoreConnection,
        sink: &dyn CacheSink,
    ) -> Result<MergeStats> {
        let mut total = MergeStats::default();
        loop {
            let pass = self.merge(conn, sink)?;
            let done = !pass.merged;
            total.absorb(pass);
            if done {
                return Ok(total);
            }
        }
    }

    /// Number of log positions this consumer is behind the tail
    pub fn lag(&self, conn: &StoreConnection) -> Result<u64> {
        let tail = conn.tail()?;
        let at = self.checkpoint()?.map(|c| c.seq).unwrap_or(0);
        Ok(tail.saturating_sub(at))
    }

    fn unavailable(&self, err: WeftError) -> WeftError {
        match err {
            WeftError::Merge(e) => WeftError::Merge(e),
            other => MergeError::CheckpointUnavailable {
                store: self.store,
                consumer: self.consumer,
                reason: other.to_string(),
            }
            .into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use weft_core::config::StoreConfig;
    use weft_core::registry::MemoryCheckpointRegistry;
    use weft_core::traits::SystemClock;
    use weft_core::types::Payload;

    const NOTE: ObjectKind = ObjectKind::new("note");

    #[derive(Default)]
    struct MapSink {
        objects: Mutex<BTreeMap<ObjectKey, Payload>>,
        applies: Mutex<usize>,
    }

    impl MapSink {
        fn get(&self, id: &str) -> Option<Vec<u8>> {
            self.objects
                .lock()
                .get(&ObjectKey::new(NOTE, id))
                .map(|p| p.to_vec())
        }

        fn len(&self) -> usize {
            self.objects.lock().len()
        }

        fn apply_local(&self, ops: &[CacheOp]) {
            self.apply(ops);
        }
    }

    impl CacheSink for MapSink {
        fn apply(&self, ops: &[CacheOp]) {
            *self.applies.lock() += 1;
            let mut objects = self.objects.lock();
            for op in ops {
                match op {
                    CacheOp::Upsert { key, payload } => {
                        objects.insert(key.clone(), payload.clone());
                    }
                    CacheOp::Remove { key } => {
                        objects.remove(key);
                    }
                    CacheOp::ClearKind { kind } => objects.retain(|k, _| &k.kind != kind),
                    CacheOp::ClearAll => objects.clear(),
                }
            }
        }
    }

    struct Fixture {
        _temp: TempDir,
        registry: Arc<MemoryCheckpointRegistry>,
        primary: StoreConnection,
        share: StoreConnection,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let cfg = StoreConfig::new(temp.path().join("main.sqlite"));
            let open = |who| {
                StoreConnection::open(StoreId::Main, who, &cfg, Arc::new(SystemClock)).unwrap()
            };
            Self {
                primary: open(ConsumerIdentity::Primary),
                share: open(ConsumerIdentity::ShareExtension),
                registry: Arc::new(MemoryCheckpointRegistry::new()),
                _temp: temp,
            }
        }

        fn merger(&self, consumer: ConsumerIdentity, batch: usize) -> HistoryMerger {
            HistoryMerger::new(
                StoreId::Main,
                consumer,
                self.registry.clone(),
                Arc::new(SystemClock),
                MergerConfig::default().with_batch_entries_max(batch),
            )
        }
    }

    fn put(conn: &StoreConnection, id: &str, body: &[u8]) -> CommittedOps {
        let ctx = conn.begin().unwrap();
        ctx.put(&ObjectKey::new(NOTE, id), body).unwrap();
        ctx.commit().unwrap().ops
    }

    type CommittedOps = Vec<CacheOp>;

    #[test]
    fn test_first_merge_initializes_checkpoint_at_tail() {
        let fx = Fixture::new();
        put(&fx.primary, "a", b"1");
        put(&fx.primary, "b", b"2");

        let merger = fx.merger(ConsumerIdentity::ShareExtension, 100);
        let sink = MapSink::default();
        let stats = merger.merge(&fx.share, &sink).unwrap();

        assert!(stats.checkpoint_initialized);
        assert!(!stats.merged);
        assert_eq!(stats.new_checkpoint, 2);
        assert_eq!(*sink.applies.lock(), 0);
        assert_eq!(merger.checkpoint().unwrap().unwrap().seq, 2);
    }

    #[test]
    fn test_remote_commits_are_merged_and_remerge_is_noop() {
        let fx = Fixture::new();
        let merger = fx.merger(ConsumerIdentity::ShareExtension, 100);
        let sink = MapSink::default();
        merger.merge(&fx.share, &sink).unwrap();

        for i in 1..=5u8 {
            put(&fx.primary, &format!("n{}", i), &[i]);
        }

        let stats = merger.merge(&fx.share, &sink).unwrap();
        assert!(stats.merged);
        assert_eq!(stats.entries_applied, 5);
        assert_eq!(stats.new_checkpoint, 5);
        assert_eq!(sink.len(), 5);
        assert_eq!(sink.get("n3"), Some(vec![3]));
        assert_eq!(merger.lag(&fx.share).unwrap(), 0);

        let again = merger.merge(&fx.share, &sink).unwrap();
        assert!(!again.merged);
        assert_eq!(again.entries_processed(), 0);
        assert_eq!(again.new_checkpoint, 5);
        assert_eq!(*sink.applies.lock(), 1);
    }

    #[test]
    fn test_own_entries_are_skipped_but_advance_checkpoint() {
        let fx = Fixture::new();
        let merger = fx.merger(ConsumerIdentity::ShareExtension, 100);
        let sink = MapSink::default();
        merger.merge(&fx.share, &sink).unwrap();

        sink.apply_local(&put(&fx.share, "mine", b"x"));
        put(&fx.primary, "theirs", b"y");

        let stats = merger.merge(&fx.share, &sink).unwrap();
        assert_eq!(stats.entries_skipped_own, 1);
        assert_eq!(stats.entries_applied, 1);
        assert_eq!(stats.new_checkpoint, 2);
        assert_eq!(sink.get("mine"), Some(b"x".to_vec()));
        assert_eq!(sink.get("theirs"), Some(b"y".to_vec()));
    }

    #[test]
    fn test_corrupt_entry_is_skipped() {
        let fx = Fixture::new();
        let merger = fx.merger(ConsumerIdentity::ShareExtension, 100);
        let sink = MapSink::default();
        merger.merge(&fx.share, &sink).unwrap();

        put(&fx.primary, "a", b"1");
        fx.primary
            .raw()
            .execute(
                "INSERT INTO history (committed_at, author, changes) VALUES ('garbage', 'primary', '[')",
                [],
            )
            .unwrap();
        put(&fx.primary, "b", b"2");

        let stats = merger.merge(&fx.share, &sink).unwrap();
        assert_eq!(stats.entries_corrupt, 1);
        assert_eq!(stats.entries_applied, 2);
        assert_eq!(stats.new_checkpoint, 3);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_row_with_blob_author_does_not_stall_consumer() {
        let fx = Fixture::new();
        let merger = fx.merger(ConsumerIdentity::ShareExtension, 100);
        let sink = MapSink::default();
        merger.merge(&fx.share, &sink).unwrap();

        fx.primary
            .raw()
            .execute(
                "INSERT INTO history (committed_at, author, changes)
                 VALUES ('2024-05-01T00:00:00Z', X'FF00', '[]')",
                [],
            )
            .unwrap();
        put(&fx.primary, "after", b"ok");

        let stats = merger.merge(&fx.share, &sink).unwrap();
        assert_eq!(stats.entries_corrupt, 1);
        assert_eq!(stats.entries_applied, 1);
        assert_eq!(stats.new_checkpoint, 2);
        assert_eq!(sink.get("after"), Some(b"ok".to_vec()));
        assert_eq!(merger.lag(&fx.share).unwrap(), 0);
    }

    #[test]
    fn test_checkpoint_from_replaced_file_reloads_sink() {
        let fx = Fixture::new();
        put(&fx.primary, "a", b"1");
        put(&fx.primary, "b", b"2");

        // Left behind by a larger log in an earlier incarnation of the file
        fx.registry
            .set(
                StoreId::Main,
                ConsumerIdentity::ShareExtension,
                Checkpoint::new(9, None, Utc::now()).with_generation("previous"),
            )
            .unwrap();

        let merger = fx.merger(ConsumerIdentity::ShareExtension, 100);
        let sink = MapSink::default();
        sink.apply_local(&[CacheOp::Upsert {
            key: ObjectKey::new(NOTE, "ghost"),
            payload: Payload::from(&b"x"[..]),
        }]);

        let stats = merger.merge_to_quiescence(&fx.share, &sink).unwrap();
        assert!(stats.store_rebuilt);
        assert_eq!(stats.new_checkpoint, 2);
        assert_eq!(sink.get("ghost"), None);
        assert_eq!(sink.len(), 2);

        let checkpoint = merger.checkpoint().unwrap().unwrap();
        assert_eq!(checkpoint.seq, 2);
        assert_eq!(checkpoint.generation.as_deref(), Some(fx.share.generation()));

        // Later entries of the new file are picked up normally
        put(&fx.primary, "c", b"3");
        let stats = merger.merge(&fx.share, &sink).unwrap();
        assert!(!stats.store_rebuilt);
        assert_eq!(stats.entries_applied, 1);
        assert_eq!(sink.get("c"), Some(b"3".to_vec()));
    }

    #[test]
    fn test_checkpoint_past_tail_is_reset_on_open() {
        let fx = Fixture::new();
        put(&fx.primary, "a", b"1");
        fx.registry
            .set(
                StoreId::Main,
                ConsumerIdentity::Primary,
                Checkpoint::new(40, None, Utc::now()),
            )
            .unwrap();

        let merger = fx.merger(ConsumerIdentity::Primary, 100);
        assert!(merger
            .ensure_checkpoint(1, None, fx.primary.generation())
            .unwrap());
        assert_eq!(merger.checkpoint().unwrap().unwrap().seq, 1);
        assert!(!merger
            .ensure_checkpoint(1, None, fx.primary.generation())
            .unwrap());
    }

    #[test]
    fn test_batches_until_quiescent() {
        let fx = Fixture::new();
        let merger = fx.merger(ConsumerIdentity::NotificationExtension, 2);
        let sink = MapSink::default();
        merger.merge(&fx.share, &sink).unwrap();

        for i in 0..5 {
            put(&fx.primary, &i.to_string(), b"v");
        }

        let first = merger.merge(&fx.share, &sink).unwrap();
        assert_eq!(first.entries_applied, 2);
        assert_eq!(merger.lag(&fx.share).unwrap(), 3);

        let rest = merger.merge_to_quiescence(&fx.share, &sink).unwrap();
        assert_eq!(rest.entries_applied, 3);
        assert_eq!(rest.new_checkpoint, 5);
        assert_eq!(sink.len(), 5);
    }

    #[test]
    fn test_refresh_reflects_latest_state() {
        let fx = Fixture::new();
        let merger = fx.merger(ConsumerIdentity::ShareExtension, 100);
        let sink = MapSink::default();
        merger.merge(&fx.share, &sink).unwrap();

        put(&fx.primary, "a", b"1");
        put(&fx.primary, "a", b"2");
        let ctx = fx.primary.begin().unwrap();
        ctx.put(&ObjectKey::new(NOTE, "gone"), b"x").unwrap();
        ctx.delete(&ObjectKey::new(NOTE, "gone")).unwrap();
        ctx.commit().unwrap();

        merger.merge(&fx.share, &sink).unwrap();
        assert_eq!(sink.get("a"), Some(b"2".to_vec()));
        assert_eq!(sink.get("gone"), None);
    }

    #[test]
    fn test_kind_delete_keeps_later_rows() {
        let fx = Fixture::new();
        let merger = fx.merger(ConsumerIdentity::ShareExtension, 100);
        let sink = MapSink::default();
        merger.merge(&fx.share, &sink).unwrap();

        put(&fx.primary, "old", b"1");
        merger.merge(&fx.share, &sink).unwrap();
        assert_eq!(sink.len(), 1);

        let ctx = fx.primary.begin().unwrap();
        ctx.delete_kind(&NOTE).unwrap();
        ctx.commit().unwrap();
        // Written locally after the remote wipe
        sink.apply_local(&put(&fx.share, "new", b"2"));

        let stats = merger.merge(&fx.share, &sink).unwrap();
        assert_eq!(stats.entries_applied, 1);
        assert_eq!(stats.entries_skipped_own, 1);
        assert_eq!(sink.get("old"), None);
        assert_eq!(sink.get("new"), Some(b"2".to_vec()));
    }

    struct BrokenRegistry;

    impl CheckpointRegistry for BrokenRegistry {
        fn get(&self, _: StoreId, _: ConsumerIdentity) -> Result<Option<Checkpoint>> {
            Err(WeftError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "container unavailable",
            )))
        }

        fn set(&self, _: StoreId, _: ConsumerIdentity, _: Checkpoint) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_registry_failure_surfaces_as_unavailable() {
        let fx = Fixture::new();
        let merger = HistoryMerger::new(
            StoreId::Main,
            ConsumerIdentity::Primary,
            Arc::new(BrokenRegistry),
            Arc::new(SystemClock),
            MergerConfig::default(),
        );

        let err = merger.merge(&fx.primary, &MapSink::default()).unwrap_err();
        assert!(matches!(
            err,
            WeftError::Merge(MergeError::CheckpointUnavailable {
                consumer: ConsumerIdentity::Primary,
                ..
            })
        ));
    }
}
