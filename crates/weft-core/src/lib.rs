//! Weft Core: types, traits and the execution serializer shared by every
//! weft crate.
//!
//! Weft keeps several processes (one primary application and two extension
//! processes) consistent against one shared SQLite store:
//! - Every commit appends an entry to a transaction log in the same transaction
//! - Each process replays entries it has not seen into its own in-memory cache
//! - Each process records how far it got in a checkpoint registry that lives
//!   outside the store
//! - The log is pruned once every consumer's checkpoint has passed an entry
//!
//! This crate holds the pieces with no storage dependency: identities, log
//! and checkpoint types, configuration, the error taxonomy, the
//! `CheckpointRegistry`/`Clock`/`ChangeSignal`/`CacheSink` seams and the
//! per-process `Serializer`.

pub mod config;
pub mod error;
pub mod observe;
pub mod registry;
pub mod serializer;
pub mod traits;
pub mod types;

pub use config::{MergerConfig, PruneSchedule, StoreConfig, SyncConfig, SynchronousMode, WeftConfig};
pub use error::{MergeError, PruneError, Result, StoreError, WeftError};
pub use registry::MemoryCheckpointRegistry;
pub use serializer::{Pending, Serializer, Turn};
pub use traits::{CacheSink, ChangeSignal, CheckpointRegistry, Clock, ManualClock, SystemClock};
pub use types::{
    CacheOp, ChangeKind, ChangeRecord, ChangeTarget, Checkpoint, ConsumerIdentity, ObjectId,
    ObjectKey, ObjectKind, Payload, SequenceId, StoreId, TransactionLogEntry,
};
