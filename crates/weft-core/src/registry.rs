//! In-memory checkpoint registry
//!
//! Shares checkpoints between store handles living in the same OS process.
//! Nothing survives a restart; use `weft_registry::FileCheckpointRegistry`
//! for real deployments.

use crate::error::Result;
use crate::traits::CheckpointRegistry;
use crate::types::{Checkpoint, ConsumerIdentity, StoreId};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MemoryCheckpointRegistry {
    entries: RwLock<HashMap<(StoreId, ConsumerIdentity), Checkpoint>>,
}

impl MemoryCheckpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a checkpoint, as if the consumer never ran
    pub fn forget(&self, store: StoreId, consumer: ConsumerIdentity) {
        self.entries.write().remove(&(store, consumer));
    }
}

impl CheckpointRegistry for MemoryCheckpointRegistry {
    fn get(&self, store: StoreId, consumer: ConsumerIdentity) -> Result<Option<Checkpoint>> {
        Ok(self.entries.read().get(&(store, consumer)).cloned())
    }

    fn set(&self, store: StoreId, consumer: ConsumerIdentity, value: Checkpoint) -> Result<bool> {
        let mut entries = self.entries.write();
        match entries.get(&(store, consumer)) {
            Some(current) if value.seq < current.seq && value.same_generation(current) => {
                tracing::debug!(
                    store = %store,
                    consumer = %consumer,
                    current = current.seq,
                    rejected = value.seq,
                    "Ignoring backward checkpoint"
                );
                Ok(false)
            }
            Some(current) if *current == value => Ok(false),
            _ => {
                entries.insert((store, consumer), value);
                Ok(true)
            }
        }
    }
}
