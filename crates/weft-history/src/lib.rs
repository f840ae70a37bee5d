//! History merging and log pruning
//!
//! Every process tails the shared transaction log and folds entries written
//! by other processes into its own cache:
//!
//! - [`HistoryMerger`] reads entries after the consumer's checkpoint, refreshes
//!   the touched objects from the store and advances the checkpoint
//! - [`HistoryPruner`] deletes entries every consumer has already merged
//!
//! Both run inside the owning process's serializer turn and take the store
//! connection from it.

pub mod merger;
pub mod pruner;

pub use merger::{HistoryMerger, MergeStats};
pub use pruner::{HistoryPruner, PruneFloor, PruneStats};
