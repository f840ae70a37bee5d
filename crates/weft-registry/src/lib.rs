//! File-backed checkpoint registry
//!
//! Checkpoints live outside the store file, in a directory every process can
//! reach (the shared container). One small JSON document per
//! `(store, consumer)`:
//!
//! ```text
//! <base_dir>/main/primary.json
//! <base_dir>/main/share-extension.json
//! <base_dir>/media/notification-extension.json
//! ```
//!
//! Each process only ever writes its own documents. Writes go to a temp file
//! in the same directory and are renamed into place, so readers in other
//! processes see either the old or the new value, never a torn one.

mod store;

pub use store::FileCheckpointRegistry;
