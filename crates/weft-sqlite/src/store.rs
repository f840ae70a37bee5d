use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use weft_core::config::StoreConfig;
use weft_core::error::StoreError;
use weft_core::traits::Clock;
use weft_core::types::{
    CacheOp, ConsumerIdentity, ObjectKey, ObjectKind, Payload, SequenceId, StoreId,
};

use crate::context::ExecutionContext;
use crate::log::{self, LogRow, LogStats};
use crate::schema;

/// Map a SQLite failure onto the store's error vocabulary
pub(crate) fn map_sqlite_err(e: rusqlite::Error) -> StoreError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            StoreError::WriteConflict(e.to_string())
        }
        _ => StoreError::IoFailure(e.to_string()),
    }
}

/// One process's connection to a shared store file.
///
/// Owned by that process's serializer worker and never moved off it;
/// the type is `!Sync` because of the cache journal.
pub struct StoreConnection {
    conn: Connection,
    store: StoreId,
    author: ConsumerIdentity,
    clock: Arc<dyn Clock>,
    path: PathBuf,
    generation: String,
    /// Cache ops recorded by open contexts, drained on the outermost commit
    pub(crate) journal: RefCell<Vec<CacheOp>>,
    /// Number of open execution contexts
    pub(crate) depth: Cell<usize>,
}

impl StoreConnection {
    pub fn open(
        store: StoreId,
        author: ConsumerIdentity,
        cfg: &StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = cfg.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::OpenFailed(format!("{}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open_with_flags(
            &cfg.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::OpenFailed(format!("{}: {}", cfg.path.display(), e)))?;

        Self::configure_connection(&conn, cfg)?;
        schema::init_schema(&conn, store)?;
        let generation = schema::generation(&conn)?;

        tracing::debug!(
            store = %store,
            author = %author,
            path = %cfg.path.display(),
            generation = %generation,
            "Opened store connection"
        );

        Ok(Self {
            conn,
            store,
            author,
            clock,
            path: cfg.path.clone(),
            generation,
            journal: RefCell::new(Vec::new()),
            depth: Cell::new(0),
        })
    }

    fn configure_connection(conn: &Connection, cfg: &StoreConfig) -> Result<(), StoreError> {
        let open_err = |e: rusqlite::Error| StoreError::OpenFailed(e.to_string());

        // Wait on other processes' write locks instead of failing immediately
        conn.busy_timeout(Duration::from_millis(cfg.busy_timeout_ms))
            .map_err(open_err)?;

        if cfg.wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(open_err)?;
        }
        conn.pragma_update(None, "synchronous", cfg.synchronous.as_pragma())
            .map_err(open_err)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(open_err)?;
        conn.pragma_update(None, "cache_size", cfg.cache_size)
            .map_err(open_err)?;

        Ok(())
    }

    pub fn store(&self) -> StoreId {
        self.store
    }

    /// Consumer recorded as author of this connection's log entries
    pub fn author(&self) -> ConsumerIdentity {
        self.author
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Generation token of the opened store file
    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Raw connection, for diagnostics and tests
    pub fn raw(&self) -> &Connection {
        &self.conn
    }

    /// Open an execution context.
    ///
    /// The first context takes the write lock (`BEGIN IMMEDIATE`); contexts
    /// opened while another is live nest as savepoints.
    pub fn begin(&self) -> Result<ExecutionContext<'_>, StoreError> {
        ExecutionContext::begin(self)
    }

    /// Whether an execution context is currently open
    pub fn in_context(&self) -> bool {
        self.depth.get() > 0
    }

    /// Run `f` against one consistent snapshot of the store.
    ///
    /// Outside a context this wraps `f` in a deferred read transaction;
    /// inside one it reads the context's own uncommitted state.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&ReadView<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let view = ReadView { conn: &self.conn };

        if !self.conn.is_autocommit() {
            return f(&view);
        }

        self.conn
            .execute_batch("BEGIN DEFERRED")
            .map_err(map_sqlite_err)?;
        let result = f(&view);
        let end = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
        if let Err(e) = self.conn.execute_batch(end) {
            tracing::warn!(store = %self.store, error = %e, "Failed to end read transaction");
        }
        result
    }

    pub fn tail(&self) -> Result<SequenceId, StoreError> {
        log::tail(&self.conn)
    }

    pub fn log_stats(&self) -> Result<LogStats, StoreError> {
        self.read(|view| view.log_stats())
    }

    /// Delete log entries with `seq <= floor`
    pub fn delete_through(&self, floor: SequenceId) -> Result<usize, StoreError> {
        log::delete_through(&self.conn, floor)
    }
}

/// Read-only queries over one snapshot, see [`StoreConnection::read`]
pub struct ReadView<'a> {
    conn: &'a Connection,
}

impl<'a> ReadView<'a> {
    pub fn tail(&self) -> Result<SequenceId, StoreError> {
        log::tail(self.conn)
    }

    pub fn log_stats(&self) -> Result<LogStats, StoreError> {
        log::stats(self.conn)
    }

    pub fn entries_after(
        &self,
        after: SequenceId,
        limit: usize,
    ) -> Result<Vec<LogRow>, StoreError> {
        log::entries_after(self.conn, after, limit)
    }

    pub fn committed_at(
        &self,
        seq: SequenceId,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, StoreError> {
        log::committed_at(self.conn, seq)
    }

    pub fn load_object(&self, key: &ObjectKey) -> Result<Option<Payload>, StoreError> {
        load_object(self.conn, key)
    }

    pub fn load_all(&self) -> Result<Vec<(ObjectKey, Payload)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, id, payload FROM objects ORDER BY kind, id")
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map([], |row| {
                let kind: String = row.get(0)?;
                let id: String = row.get(1)?;
                let payload: Vec<u8> = row.get(2)?;
                Ok((ObjectKey::new(ObjectKind::owned(kind), id), Payload::from(payload)))
            })
            .map_err(map_sqlite_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite_err)
    }

    /// Current objects of one kind
    pub fn load_kind(&self, kind: &ObjectKind) -> Result<Vec<(ObjectKey, Payload)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, payload FROM objects WHERE kind = ?1 ORDER BY id")
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map(params![kind.as_str()], |row| {
                let id: String = row.get(0)?;
                let payload: Vec<u8> = row.get(1)?;
                Ok((ObjectKey::new(kind.clone(), id), Payload::from(payload)))
            })
            .map_err(map_sqlite_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite_err)
    }

    pub fn count(&self, kind: &ObjectKind) -> Result<usize, StoreError> {
        count_kind(self.conn, kind)
    }
}

pub(crate) fn load_object(
    conn: &Connection,
    key: &ObjectKey,
) -> Result<Option<Payload>, StoreError> {
    conn.query_row(
        "SELECT payload FROM objects WHERE kind = ?1 AND id = ?2",
        params![key.kind.as_str(), key.id.as_str()],
        |row| row.get::<_, Vec<u8>>(0),
    )
    .optional()
    .map(|payload| payload.map(Payload::from))
    .map_err(map_sqlite_err)
}

pub(crate) fn count_kind(conn: &Connection, kind: &ObjectKind) -> Result<usize, StoreError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM objects WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )
        .map_err(map_sqlite_err)?;
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use weft_core::traits::SystemClock;

    fn open(dir: &TempDir, author: ConsumerIdentity) -> StoreConnection {
        let cfg = StoreConfig::new(dir.path().join(StoreId::Main.file_name()));
        StoreConnection::open(StoreId::Main, author, &cfg, Arc::new(SystemClock)).unwrap()
    }

    #[test]
    fn test_open_creates_parent_dirs_and_schema() {
        let temp = TempDir::new().unwrap();
        let cfg = StoreConfig::new(temp.path().join("nested/dir/main.sqlite"));
        let conn = StoreConnection::open(
            StoreId::Main,
            ConsumerIdentity::Primary,
            &cfg,
            Arc::new(SystemClock),
        )
        .unwrap();

        assert!(cfg.path.exists());
        assert_eq!(conn.tail().unwrap(), 0);
        assert_eq!(conn.log_stats().unwrap(), LogStats::default());
    }

    #[test]
    fn test_open_rejects_other_store_file() {
        let temp = TempDir::new().unwrap();
        let cfg = StoreConfig::new(temp.path().join("shared.sqlite"));
        StoreConnection::open(StoreId::Main, ConsumerIdentity::Primary, &cfg, Arc::new(SystemClock))
            .unwrap();

        let err = StoreConnection::open(
            StoreId::Media,
            ConsumerIdentity::Primary,
            &cfg,
            Arc::new(SystemClock),
        )
        .err()
        .unwrap();
        assert!(matches!(err, StoreError::OpenFailed(_)));
    }

    #[test]
    fn test_recreated_file_gets_new_generation() {
        let temp = TempDir::new().unwrap();
        let first = open(&temp, ConsumerIdentity::Primary);
        let sibling = open(&temp, ConsumerIdentity::ShareExtension);
        assert_eq!(first.generation(), sibling.generation());

        let before = first.generation().to_string();
        let path = first.path().to_path_buf();
        drop(first);
        drop(sibling);
        std::fs::remove_file(&path).unwrap();
        let _ = std::fs::remove_file(path.with_extension("sqlite-wal"));
        let _ = std::fs::remove_file(path.with_extension("sqlite-shm"));

        let rebuilt = open(&temp, ConsumerIdentity::Primary);
        assert_ne!(rebuilt.generation(), before);
    }

    #[test]
    fn test_two_connections_see_each_others_commits() {
        let temp = TempDir::new().unwrap();
        let primary = open(&temp, ConsumerIdentity::Primary);
        let share = open(&temp, ConsumerIdentity::ShareExtension);

        let ctx = share.begin().unwrap();
        ctx.put(&ObjectKey::new(ObjectKind::new("note"), "n1"), b"hello")
            .unwrap();
        ctx.commit().unwrap();

        let (tail, payload) = primary
            .read(|view| {
                Ok((
                    view.tail()?,
                    view.load_object(&ObjectKey::new(ObjectKind::new("note"), "n1"))?,
                ))
            })
            .unwrap();
        assert_eq!(tail, 1);
        assert_eq!(payload.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_concurrent_writer_reports_write_conflict() {
        let temp = TempDir::new().unwrap();
        let mut cfg = StoreConfig::new(temp.path().join("main.sqlite"));
        cfg.busy_timeout_ms = 0;

        let a = StoreConnection::open(StoreId::Main, ConsumerIdentity::Primary, &cfg, Arc::new(SystemClock))
            .unwrap();
        let b = StoreConnection::open(
            StoreId::Main,
            ConsumerIdentity::NotificationExtension,
            &cfg,
            Arc::new(SystemClock),
        )
        .unwrap();

        let _held = a.begin().unwrap();
        assert!(matches!(b.begin(), Err(StoreError::WriteConflict(_))));
    }
}
