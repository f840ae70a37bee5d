use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::time::Instant;
use weft_core::error::{Result as WeftResult, StoreError};
use weft_core::observe;
use weft_core::types::{
    CacheOp, ChangeKind, ChangeRecord, ObjectId, ObjectKey, ObjectKind, Payload, SequenceId,
};

use crate::log;
use crate::store::{count_kind, load_object, map_sqlite_err, StoreConnection};

/// What an execution context left behind once it was committed
#[derive(Debug, Clone, Default)]
pub struct CommittedChanges {
    /// Sequence id of the log entry written for this context, `None` when
    /// nothing changed
    pub seq: Option<SequenceId>,

    /// Change records written to the log entry
    pub changes: Vec<ChangeRecord>,

    /// Cache updates to apply in this process. Only the outermost context
    /// carries them; nested contexts hand theirs to the enclosing one.
    pub ops: Vec<CacheOp>,
}

impl CommittedChanges {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// An open transaction on a [`StoreConnection`].
///
/// The outermost context holds the store's write lock from `begin` until
/// `commit` or `rollback`; a context opened while another is live becomes a
/// savepoint inside it. Every context that changed something appends its
/// own log entry when it commits. Dropping an open context rolls it back.
pub struct ExecutionContext<'a> {
    store: &'a StoreConnection,
    level: usize,
    journal_mark: usize,
    changes: RefCell<Vec<ChangeRecord>>,
    open: Cell<bool>,
    started: Instant,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn begin(store: &'a StoreConnection) -> Result<Self, StoreError> {
        let level = store.depth.get();
        let conn = store.raw();

        if level == 0 {
            conn.execute_batch("BEGIN IMMEDIATE TRANSACTION")
                .map_err(map_sqlite_err)?;
        } else {
            conn.execute_batch(&format!("SAVEPOINT {}", savepoint_name(level)))
                .map_err(map_sqlite_err)?;
        }

        store.depth.set(level + 1);
        let journal_mark = store.journal.borrow().len();

        Ok(Self {
            store,
            level,
            journal_mark,
            changes: RefCell::new(Vec::new()),
            open: Cell::new(true),
            started: Instant::now(),
        })
    }

    /// Nesting level, 0 for the context holding the write lock
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn connection(&self) -> &'a StoreConnection {
        self.store
    }

    /// Number of change records recorded so far
    pub fn pending_changes(&self) -> usize {
        self.changes.borrow().len()
    }

    pub fn get(&self, key: &ObjectKey) -> Result<Option<Payload>, StoreError> {
        load_object(self.store.raw(), key)
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &ObjectKey) -> WeftResult<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn exists(&self, key: &ObjectKey) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .store
            .raw()
            .query_row(
                "SELECT 1 FROM objects WHERE kind = ?1 AND id = ?2",
                params![key.kind.as_str(), key.id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sqlite_err)?;
        Ok(found.is_some())
    }

    /// Insert or replace an object
    pub fn put(&self, key: &ObjectKey, payload: &[u8]) -> Result<ChangeKind, StoreError> {
        let op = if self.exists(key)? {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };

        self.store
            .raw()
            .execute(
                "INSERT INTO objects (kind, id, payload) VALUES (?1, ?2, ?3)
                 ON CONFLICT (kind, id) DO UPDATE SET payload = excluded.payload",
                params![key.kind.as_str(), key.id.as_str(), payload],
            )
            .map_err(map_sqlite_err)?;

        self.record(
            ChangeRecord::object(key.clone(), op),
            CacheOp::Upsert {
                key: key.clone(),
                payload: Payload::from(payload),
            },
        );
        Ok(op)
    }

    pub fn put_json<T: Serialize>(&self, key: &ObjectKey, value: &T) -> WeftResult<ChangeKind> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self.put(key, &bytes)?)
    }

    /// Delete one object. Returns whether it existed.
    pub fn delete(&self, key: &ObjectKey) -> Result<bool, StoreError> {
        let deleted = self
            .store
            .raw()
            .execute(
                "DELETE FROM objects WHERE kind = ?1 AND id = ?2",
                params![key.kind.as_str(), key.id.as_str()],
            )
            .map_err(map_sqlite_err)?;

        if deleted > 0 {
            self.record(
                ChangeRecord::object(key.clone(), ChangeKind::Delete),
                CacheOp::Remove { key: key.clone() },
            );
        }
        Ok(deleted > 0)
    }

    /// Delete every object of `kind` with one statement.
    ///
    /// Nothing is loaded; the log gets a single kind-wide record instead of
    /// one per object.
    pub fn delete_kind(&self, kind: &ObjectKind) -> Result<usize, StoreError> {
        let deleted = self
            .store
            .raw()
            .execute("DELETE FROM objects WHERE kind = ?1", params![kind.as_str()])
            .map_err(map_sqlite_err)?;

        if deleted > 0 {
            self.record(
                ChangeRecord::kind_deleted(kind.clone()),
                CacheOp::ClearKind { kind: kind.clone() },
            );
        }
        Ok(deleted)
    }

    pub fn ids(&self, kind: &ObjectKind) -> Result<Vec<ObjectId>, StoreError> {
        let mut stmt = self
            .store
            .raw()
            .prepare_cached("SELECT id FROM objects WHERE kind = ?1 ORDER BY id")
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map(params![kind.as_str()], |row| row.get::<_, String>(0))
            .map_err(map_sqlite_err)?;

        rows.map(|id| id.map(ObjectId::from))
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite_err)
    }

    pub fn count(&self, kind: &ObjectKind) -> Result<usize, StoreError> {
        count_kind(self.store.raw(), kind)
    }

    fn record(&self, change: ChangeRecord, op: CacheOp) {
        self.changes.borrow_mut().push(change);
        self.store.journal.borrow_mut().push(op);
    }

    /// Append the log entry and commit (or release the savepoint).
    ///
    /// On failure the context is rolled back when dropped.
    pub fn commit(self) -> Result<CommittedChanges, StoreError> {
        if self.store.depth.get() != self.level + 1 {
            return Err(StoreError::IoFailure(
                "cannot commit a context while a nested context is still open".into(),
            ));
        }

        let result = self.finish();
        observe::record_commit(self.started.elapsed(), result.is_ok());
        result
    }

    fn finish(&self) -> Result<CommittedChanges, StoreError> {
        let conn = self.store.raw();
        let changes = std::mem::take(&mut *self.changes.borrow_mut());

        let seq = if changes.is_empty() {
            None
        } else {
            Some(log::append(
                conn,
                self.store.clock().now(),
                self.store.author(),
                &changes,
            )?)
        };

        if self.level == 0 {
            conn.execute_batch("COMMIT").map_err(map_sqlite_err)?;
        } else {
            conn.execute_batch(&format!("RELEASE SAVEPOINT {}", savepoint_name(self.level)))
                .map_err(map_sqlite_err)?;
        }
        self.close();

        let ops = if self.level == 0 {
            std::mem::take(&mut *self.store.journal.borrow_mut())
        } else {
            Vec::new()
        };

        if let Some(seq) = seq {
            tracing::debug!(
                store = %self.store.store(),
                seq,
                changes = changes.len(),
                level = self.level,
                "Committed execution context"
            );
        }

        Ok(CommittedChanges { seq, changes, ops })
    }

    /// Discard everything done in this context
    pub fn rollback(self) -> Result<(), StoreError> {
        self.abort()
    }

    fn abort(&self) -> Result<(), StoreError> {
        let conn = self.store.raw();
        let result = if self.level == 0 {
            conn.execute_batch("ROLLBACK")
        } else {
            let name = savepoint_name(self.level);
            conn.execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"
            ))
        };

        self.store.journal.borrow_mut().truncate(self.journal_mark);
        self.close();
        result.map_err(map_sqlite_err)
    }

    fn close(&self) {
        self.open.set(false);
        // An enclosing rollback may already have unwound this level
        let depth = self.store.depth.get();
        self.store.depth.set(self.level.min(depth));
    }
}

impl Drop for ExecutionContext<'_> {
    fn drop(&mut self) {
        if self.open.get() {
            if let Err(e) = self.abort() {
                tracing::warn!(
                    store = %self.store.store(),
                    level = self.level,
                    error = %e,
                    "Failed to roll back abandoned context"
                );
            }
        }
    }
}

fn savepoint_name(level: usize) -> String {
    format!("weft_ctx_{}", level)
}
