//! SQLite-backed persistent store handle
//!
//! One shared database file per store, opened by every process. Each commit
//! writes the changed objects and one transaction log entry in the same
//! SQLite transaction, so a reader never sees data without its log entry or
//! the other way round.
//!
//! Key features:
//! - WAL mode so readers in other processes never block the writer
//! - `AUTOINCREMENT` log sequence: ids are never reused, even after the
//!   whole log has been pruned
//! - Nested execution contexts via savepoints
//! - Kind-wide bulk deletes that never load the deleted objects

pub mod context;
pub mod log;
pub mod schema;
pub mod store;

pub use context::{CommittedChanges, ExecutionContext};
pub use log::{LogRow, LogStats};
pub use store::{ReadView, StoreConnection};
