//! Weft: keeps several processes consistent against one shared SQLite store
//!
//! A primary application and its extension processes each open the same
//! store file. Every commit writes the changed objects and one transaction
//! log entry atomically; every process tails that log and folds other
//! processes' changes into its own in-memory cache. Each consumer's progress
//! is a checkpoint kept outside the store, and the log is pruned only below
//! the slowest consumer.
//!
//! # Quick Start
//!
//! ```no_run
//! use weft::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let config = WeftConfig::new("/shared/main.sqlite".into());
//! let registry = Arc::new(FileCheckpointRegistry::open("/shared/checkpoints")?);
//! let store = WeftStore::open(WeftOptions::new(
//!     StoreId::Main,
//!     ConsumerIdentity::Primary,
//!     config,
//!     registry,
//! ))?;
//!
//! const NOTE: ObjectKind = ObjectKind::new("note");
//!
//! // Write through the serializer, read from the cache
//! store.upsert(NOTE, "n1", b"hello".to_vec()).wait()?;
//! let count = store.perform_read(|snapshot| snapshot.count(&NOTE));
//! assert_eq!(count, 1);
//!
//! // Pick up other processes' commits
//! store.merge_now().wait()?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod db;
pub mod prelude;
pub mod signal;

// Re-export core types
pub use weft_core::{
    config::{
        MergerConfig, PruneSchedule, StoreConfig, SyncConfig, SynchronousMode, WeftConfig,
    },
    error::{MergeError, PruneError, Result, StoreError, WeftError},
    registry::MemoryCheckpointRegistry,
    serializer::{Pending, Serializer, Turn},
    traits::{
        CacheSink, ChangeSignal, CheckpointRegistry, Clock, ManualClock, SignalHandler,
        SubscriptionId, SystemClock,
    },
    types::{
        CacheOp, ChangeKind, ChangeRecord, ChangeTarget, Checkpoint, ConsumerIdentity, ObjectId,
        ObjectKey, ObjectKind, Payload, SequenceId, StoreId, TransactionLogEntry,
    },
};

// Re-export implementations
pub use weft_history::{HistoryMerger, HistoryPruner, MergeStats, PruneFloor, PruneStats};
pub use weft_registry::FileCheckpointRegistry;
pub use weft_sqlite::{CommittedChanges, ExecutionContext, LogStats, StoreConnection};

// Re-export main types from this crate
pub use cache::{CacheSnapshot, CacheViews, LiveCache};
pub use db::{DeletionStrategy, StoreStatus, WeftOptions, WeftStore, WipePlan};
pub use signal::{FileSignal, SignalHub};
