pub mod history;
pub mod identity;
pub mod object;

pub use history::{
    CacheOp, ChangeKind, ChangeRecord, ChangeTarget, Checkpoint, SequenceId, TransactionLogEntry,
};
pub use identity::{ConsumerIdentity, StoreId};
pub use object::{ObjectId, ObjectKey, ObjectKind, Payload};
