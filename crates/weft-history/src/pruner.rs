//! Log garbage collection bounded by the slowest consumer

use std::sync::Arc;
use std::time::{Duration, Instant};
use weft_core::error::{PruneError, Result};
use weft_core::observe;
use weft_core::traits::CheckpointRegistry;
use weft_core::types::{ConsumerIdentity, SequenceId, StoreId};
use weft_sqlite::StoreConnection;

/// Where pruning may cut the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneFloor {
    /// Every consumer has merged through this sequence id
    Ready(SequenceId),
    /// These consumers have no checkpoint for the store file as it is now:
    /// they never ran, or their checkpoint predates a rebuild of the file
    Blocked(Vec<ConsumerIdentity>),
}

/// Outcome of one prune pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Entries deleted
    pub deleted: usize,
    /// Minimum checkpoint over all consumers, if every consumer has one
    pub floor: Option<SequenceId>,
    /// Consumers without a current checkpoint; non-empty means nothing was
    /// deleted
    pub blocked_by: Vec<ConsumerIdentity>,
    pub duration: Duration,
}

impl PruneStats {
    pub fn is_blocked(&self) -> bool {
        !self.blocked_by.is_empty()
    }
}

pub struct HistoryPruner {
    store: StoreId,
    registry: Arc<dyn CheckpointRegistry>,
}

impl HistoryPruner {
    pub fn new(store: StoreId, registry: Arc<dyn CheckpointRegistry>) -> Self {
        Self { store, registry }
    }

    /// Minimum checkpoint over every consumer of the store behind `conn`.
    ///
    /// Other consumers' checkpoints may lag, which only lowers the floor.
    /// A checkpoint from another generation of the store file, or one past
    /// the log tail, says nothing about this log and blocks pruning until
    /// its consumer has caught up with the current file.
    pub fn floor(&self, conn: &StoreConnection) -> Result<PruneFloor> {
        let tail = conn.tail()?;
        let generation = conn.generation();
        let mut floor: Option<SequenceId> = None;
        let mut missing = Vec::new();

        for &consumer in self.registry.all_consumers(self.store) {
            match self.registry.get(self.store, consumer)? {
                Some(checkpoint) if checkpoint.is_current(generation, tail) => {
                    floor = Some(floor.map_or(checkpoint.seq, |f| f.min(checkpoint.seq)));
                }
                Some(checkpoint) => {
                    tracing::warn!(
                        store = %self.store,
                        consumer = %consumer,
                        checkpoint = checkpoint.seq,
                        tail,
                        "Checkpoint does not match store file, holding back pruning"
                    );
                    missing.push(consumer);
                }
                None => missing.push(consumer),
            }
        }

        if !missing.is_empty() {
            return Ok(PruneFloor::Blocked(missing));
        }
        Ok(PruneFloor::Ready(floor.unwrap_or(0)))
    }

    /// Delete every entry at or below the floor.
    ///
    /// Runs inside the serializer turn that owns `conn`.
    pub fn prune(&self, conn: &StoreConnection) -> Result<PruneStats> {
        let started = Instant::now();

        let floor = match self.floor(conn)? {
            PruneFloor::Ready(floor) => floor,
            PruneFloor::Blocked(blocked_by) => {
                tracing::debug!(
                    store = %self.store,
                    blocked_by = ?blocked_by,
                    "Pruning blocked by consumers without current checkpoints"
                );
                observe::record_prune("blocked", 0);
                return Ok(PruneStats {
                    blocked_by,
                    duration: started.elapsed(),
                    ..PruneStats::default()
                });
            }
        };

        if floor == 0 {
            return Ok(PruneStats {
                floor: Some(0),
                duration: started.elapsed(),
                ..PruneStats::default()
            });
        }

        let deleted = conn.delete_through(floor).map_err(|e| {
            observe::record_prune("fail", 0);
            PruneError::DeleteFailed {
                floor,
                reason: e.to_string(),
            }
        })?;

        observe::record_prune("pruned", deleted as u64);
        if deleted > 0 {
            tracing::info!(store = %self.store, floor, deleted, "Pruned transaction log");
        } else {
            tracing::debug!(store = %self.store, floor, "Nothing to prune");
        }

        Ok(PruneStats {
            deleted,
            floor: Some(floor),
            blocked_by: Vec::new(),
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;
    use weft_core::config::StoreConfig;
    use weft_core::registry::MemoryCheckpointRegistry;
    use weft_core::traits::SystemClock;
    use weft_core::types::{Checkpoint, ObjectKey, ObjectKind};

    fn open(temp: &TempDir) -> StoreConnection {
        let cfg = StoreConfig::new(temp.path().join("main.sqlite"));
        StoreConnection::open(
            StoreId::Main,
            ConsumerIdentity::Primary,
            &cfg,
            Arc::new(SystemClock),
        )
        .unwrap()
    }

    fn commit_n(conn: &StoreConnection, n: usize) {
        for i in 0..n {
            let ctx = conn.begin().unwrap();
            ctx.put(&ObjectKey::new(ObjectKind::new("note"), i.to_string()), b"v")
                .unwrap();
            ctx.commit().unwrap();
        }
    }

    fn set(registry: &MemoryCheckpointRegistry, consumer: ConsumerIdentity, seq: SequenceId) {
        registry
            .set(StoreId::Main, consumer, Checkpoint::new(seq, None, Utc::now()))
            .unwrap();
    }

    #[test]
    fn test_prunes_through_common_checkpoint() {
        let temp = TempDir::new().unwrap();
        let conn = open(&temp);
        let registry = Arc::new(MemoryCheckpointRegistry::new());
        commit_n(&conn, 5);

        for consumer in ConsumerIdentity::ALL {
            set(&registry, consumer, 5);
        }

        let pruner = HistoryPruner::new(StoreId::Main, registry.clone());
        let stats = pruner.prune(&conn).unwrap();
        assert_eq!(stats.deleted, 5);
        assert_eq!(stats.floor, Some(5));
        assert_eq!(conn.log_stats().unwrap().count, 0);
        assert_eq!(conn.tail().unwrap(), 5);
    }

    #[test]
    fn test_never_deletes_above_slowest_consumer() {
        let temp = TempDir::new().unwrap();
        let conn = open(&temp);
        let registry = Arc::new(MemoryCheckpointRegistry::new());
        commit_n(&conn, 10);

        set(&registry, ConsumerIdentity::Primary, 10);
        set(&registry, ConsumerIdentity::ShareExtension, 4);
        set(&registry, ConsumerIdentity::NotificationExtension, 7);

        let pruner = HistoryPruner::new(StoreId::Main, registry.clone());
        assert_eq!(pruner.floor(&conn).unwrap(), PruneFloor::Ready(4));

        let stats = pruner.prune(&conn).unwrap();
        assert_eq!(stats.deleted, 4);
        let remaining = conn.log_stats().unwrap();
        assert_eq!(remaining.oldest, Some(5));
        assert_eq!(remaining.count, 6);
    }

    #[test]
    fn test_consumer_that_never_ran_blocks_pruning() {
        let temp = TempDir::new().unwrap();
        let conn = open(&temp);
        let registry = Arc::new(MemoryCheckpointRegistry::new());
        commit_n(&conn, 3);

        set(&registry, ConsumerIdentity::Primary, 3);
        set(&registry, ConsumerIdentity::NotificationExtension, 3);

        let pruner = HistoryPruner::new(StoreId::Main, registry.clone());
        let stats = pruner.prune(&conn).unwrap();
        assert!(stats.is_blocked());
        assert_eq!(stats.blocked_by, vec![ConsumerIdentity::ShareExtension]);
        assert_eq!(stats.deleted, 0);
        assert_eq!(conn.log_stats().unwrap().count, 3);

        // First run of the missing consumer unblocks it
        set(&registry, ConsumerIdentity::ShareExtension, 3);
        assert_eq!(pruner.prune(&conn).unwrap().deleted, 3);
    }

    #[test]
    fn test_checkpoints_from_replaced_store_block_pruning() {
        let temp = TempDir::new().unwrap();
        let conn = open(&temp);
        let registry = Arc::new(MemoryCheckpointRegistry::new());
        commit_n(&conn, 3);

        set(&registry, ConsumerIdentity::Primary, 3);
        // Left over from a larger log in a previous file
        set(&registry, ConsumerIdentity::ShareExtension, 5);
        registry
            .set(
                StoreId::Main,
                ConsumerIdentity::NotificationExtension,
                Checkpoint::new(2, None, Utc::now()).with_generation("gone"),
            )
            .unwrap();

        let pruner = HistoryPruner::new(StoreId::Main, registry.clone());
        assert_eq!(
            pruner.floor(&conn).unwrap(),
            PruneFloor::Blocked(vec![
                ConsumerIdentity::ShareExtension,
                ConsumerIdentity::NotificationExtension,
            ])
        );
        let stats = pruner.prune(&conn).unwrap();
        assert_eq!(stats.deleted, 0);
        assert_eq!(conn.log_stats().unwrap().count, 3);

        // Both catch up against the current file
        for consumer in [
            ConsumerIdentity::ShareExtension,
            ConsumerIdentity::NotificationExtension,
        ] {
            registry
                .set(
                    StoreId::Main,
                    consumer,
                    Checkpoint::new(3, None, Utc::now()).with_generation(conn.generation()),
                )
                .unwrap();
        }
        assert_eq!(pruner.prune(&conn).unwrap().deleted, 3);
    }

    #[test]
    fn test_zero_floor_deletes_nothing() {
        let temp = TempDir::new().unwrap();
        let conn = open(&temp);
        let registry = Arc::new(MemoryCheckpointRegistry::new());
        commit_n(&conn, 2);
        for consumer in ConsumerIdentity::ALL {
            set(&registry, consumer, 0);
        }

        let stats = HistoryPruner::new(StoreId::Main, registry)
            .prune(&conn)
            .unwrap();
        assert_eq!(stats.floor, Some(0));
        assert_eq!(stats.deleted, 0);
        assert_eq!(conn.log_stats().unwrap().count, 2);
    }
}
