use crate::types::{ConsumerIdentity, SequenceId, StoreId};
use std::io;
use thiserror::Error;

/// Failures of the persistent store handle.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    OpenFailed(String),

    #[error("Write conflict: {0}")]
    WriteConflict(String),

    #[error("Store IO failure: {0}")]
    IoFailure(String),
}

/// Failures of a merge pass.
///
/// `LogEntryCorrupt` is recovered inside the merger (the entry is skipped)
/// and only surfaces through logs and stats.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Log entry {seq} is corrupt: {reason}")]
    LogEntryCorrupt { seq: SequenceId, reason: String },

    #[error("Checkpoint for {store}/{consumer} unavailable: {reason}")]
    CheckpointUnavailable {
        store: StoreId,
        consumer: ConsumerIdentity,
        reason: String,
    },
}

/// Failures of a prune pass. Never fatal; the next pass retries.
#[derive(Error, Debug)]
pub enum PruneError {
    #[error("Failed to delete log entries through {floor}: {reason}")]
    DeleteFailed { floor: SequenceId, reason: String },
}

#[derive(Error, Debug)]
pub enum WeftError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Prune(#[from] PruneError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serializer is shut down")]
    SerializerClosed,

    #[error("Blocking wait on serializer work from inside one of its own turns")]
    WaitInsideTurn,

    #[error("Work panicked inside serializer turn: {0}")]
    WorkPanicked(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for WeftError {
    fn from(err: serde_json::Error) -> Self {
        WeftError::Serialization(err.to_string())
    }
}

impl WeftError {
    /// True for errors worth retrying on the next trigger (busy store,
    /// unreadable checkpoint) as opposed to caller mistakes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WeftError::Store(StoreError::WriteConflict(_))
                | WeftError::Merge(MergeError::CheckpointUnavailable { .. })
                | WeftError::Prune(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;
