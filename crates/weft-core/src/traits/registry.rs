use crate::error::Result;
use crate::types::{Checkpoint, ConsumerIdentity, StoreId};

/// Durable per-consumer checkpoint storage, kept outside the main store.
///
/// Every process writes only its own `(store, consumer)` key but reads the
/// others' keys for pruning. Reads of other consumers may be stale; callers
/// only rely on them as a lower bound.
pub trait CheckpointRegistry: Send + Sync {
    /// Load the checkpoint, `None` if the consumer never ran against `store`
    fn get(&self, store: StoreId, consumer: ConsumerIdentity) -> Result<Option<Checkpoint>>;

    /// Store a checkpoint.
    ///
    /// Monotonic within a store generation: a value whose `seq` is below the
    /// stored one is ignored unless the two were taken against different
    /// generations of the store file. Returns whether the stored value changed.
    fn set(&self, store: StoreId, consumer: ConsumerIdentity, value: Checkpoint) -> Result<bool>;

    /// Consumers that must have observed an entry before it can be pruned
    fn all_consumers(&self, _store: StoreId) -> &'static [ConsumerIdentity] {
        &ConsumerIdentity::ALL
    }
}
