//! Weft Prelude
//!
//! ```
//! use weft::prelude::*;
//! ```

// Core types
pub use crate::{
    ChangeKind, Checkpoint, ConsumerIdentity, ObjectId, ObjectKey, ObjectKind, Payload, Result,
    SequenceId, StoreId, WeftError,
};

// Configs
pub use crate::{MergerConfig, PruneSchedule, StoreConfig, SyncConfig, WeftConfig};

// Store handle
pub use crate::{
    CacheSnapshot, DeletionStrategy, ExecutionContext, Pending, StoreStatus, WeftOptions,
    WeftStore, WipePlan,
};

// Collaborator seams and their implementations
pub use crate::{
    ChangeSignal, CheckpointRegistry, Clock, FileCheckpointRegistry, FileSignal,
    MemoryCheckpointRegistry, SignalHub, SystemClock,
};

// Re-export common external deps
pub use anyhow;
pub use serde::{Deserialize, Serialize};
pub use std::sync::Arc;
pub use tracing;
