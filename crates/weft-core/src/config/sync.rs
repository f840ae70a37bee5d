use crate::types::ConsumerIdentity;
use serde::{Deserialize, Serialize};

/// Who prunes the log, and how often.
///
/// Only `owner` prunes. It prunes after every merge that advanced its own
/// checkpoint and on every tick of `interval_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneSchedule {
    /// Consumer responsible for pruning
    /// Default: primary
    #[serde(default = "default_prune_owner")]
    pub owner: ConsumerIdentity,

    /// Periodic prune interval (milliseconds)
    /// Default: 300000 (5 minutes)
    #[serde(default = "default_prune_interval_ms")]
    pub interval_ms: u64,
}

fn default_prune_owner() -> ConsumerIdentity {
    ConsumerIdentity::Primary
}

fn default_prune_interval_ms() -> u64 {
    300_000
}

impl Default for PruneSchedule {
    fn default() -> Self {
        Self {
            owner: default_prune_owner(),
            interval_ms: default_prune_interval_ms(),
        }
    }
}

/// Configuration for the background sync loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Backstop poll interval when no change signal arrives (milliseconds).
    /// Signals can be lost while a process is suspended, so the loop merges
    /// at least this often.
    /// Default: 30000
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub prune: PruneSchedule,
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            prune: PruneSchedule::default(),
        }
    }
}

impl SyncConfig {
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_prune_owner(mut self, owner: ConsumerIdentity) -> Self {
        self.prune.owner = owner;
        self
    }

    pub fn with_prune_interval_ms(mut self, ms: u64) -> Self {
        self.prune.interval_ms = ms;
        self
    }
}
