use crate::types::identity::ConsumerIdentity;
use crate::types::object::{ObjectKey, ObjectKind, Payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Log sequence id - strictly monotonic, never reused. `0` sorts before
/// the first entry.
pub type SequenceId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// What a change record refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ChangeTarget {
    /// A single object
    Object(ObjectKey),
    /// Every object of a kind (bulk delete, no per-object tracking)
    Kind { kind: ObjectKind },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub target: ChangeTarget,
    pub op: ChangeKind,
}

impl ChangeRecord {
    pub fn object(key: ObjectKey, op: ChangeKind) -> Self {
        Self {
            target: ChangeTarget::Object(key),
            op,
        }
    }

    pub fn kind_deleted(kind: ObjectKind) -> Self {
        Self {
            target: ChangeTarget::Kind { kind },
            op: ChangeKind::Delete,
        }
    }
}

/// One committed write, as recorded in the shared log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    pub seq: SequenceId,
    pub committed_at: DateTime<Utc>,
    pub author: ConsumerIdentity,
    pub changes: Vec<ChangeRecord>,
}

/// Highest log position a consumer has fully merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub seq: SequenceId,

    /// Commit time of the entry at `seq` (None when initialized on an empty
    /// log or before any entry was merged)
    #[serde(default)]
    pub committed_at: Option<DateTime<Utc>>,

    /// When the checkpoint was last written
    pub updated_at: DateTime<Utc>,

    /// Generation of the store file the checkpoint was taken against.
    /// Sequence ids from different generations are not comparable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
}

impl Checkpoint {
    pub fn new(
        seq: SequenceId,
        committed_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            seq,
            committed_at,
            updated_at,
            generation: None,
        }
    }

    pub fn with_generation(mut self, generation: impl Into<String>) -> Self {
        self.generation = Some(generation.into());
        self
    }

    /// Whether both checkpoints position into the same store file
    pub fn same_generation(&self, other: &Checkpoint) -> bool {
        self.generation == other.generation
    }

    /// Whether the checkpoint still points into a store of `generation`
    /// whose log ends at `tail`.
    ///
    /// A checkpoint without a recorded generation is judged by `seq` alone.
    pub fn is_current(&self, generation: &str, tail: SequenceId) -> bool {
        self.seq <= tail
            && self
                .generation
                .as_deref()
                .map_or(true, |own| own == generation)
    }
}

/// One step of a cache update. Applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOp {
    Upsert { key: ObjectKey, payload: Payload },
    Remove { key: ObjectKey },
    ClearKind { kind: ObjectKind },
    /// Drop every cached object (the store file was replaced)
    ClearAll,
}
