//! The `history` table: one row per committed transaction.
//!
//! Rows are read raw and decoded separately so a single corrupt row can be
//! skipped by the merger without failing the whole batch.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use weft_core::error::{MergeError, StoreError};
use weft_core::types::{ChangeRecord, ConsumerIdentity, SequenceId, TransactionLogEntry};

use crate::store::map_sqlite_err;

/// Undecoded history row.
///
/// Columns are kept as whatever SQLite stored; a value of the wrong type is
/// a decode failure, not a read failure.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub seq: SequenceId,
    pub committed_at: Value,
    pub author: Value,
    pub changes: Value,
}

impl LogRow {
    pub fn decode(&self) -> Result<TransactionLogEntry, MergeError> {
        let corrupt = |reason: String| MergeError::LogEntryCorrupt {
            seq: self.seq,
            reason,
        };
        let raw_time = self.text("committed_at", &self.committed_at)?;
        let committed_at = DateTime::parse_from_rfc3339(raw_time)
            .map_err(|e| corrupt(format!("bad timestamp '{}': {}", raw_time, e)))?
            .with_timezone(&Utc);
        let author = self.text("author", &self.author)?
            .parse::<ConsumerIdentity>()
            .map_err(corrupt)?;
        let changes: Vec<ChangeRecord> = serde_json::from_str(self.text("changes", &self.changes)?)
            .map_err(|e| corrupt(format!("bad change list: {}", e)))?;

        Ok(TransactionLogEntry {
            seq: self.seq,
            committed_at,
            author,
            changes,
        })
    }

    fn text<'a>(&self, column: &str, value: &'a Value) -> Result<&'a str, MergeError> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(MergeError::LogEntryCorrupt {
                seq: self.seq,
                reason: format!("column {} holds {}, expected text", column, other.data_type()),
            }),
        }
    }
}

/// Shape of the retained log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStats {
    /// Highest sequence id ever assigned (survives pruning)
    pub tail: SequenceId,
    /// Lowest retained sequence id
    pub oldest: Option<SequenceId>,
    /// Number of retained entries
    pub count: u64,
}

/// Append an entry and return its sequence id
pub(crate) fn append(
    conn: &Connection,
    committed_at: DateTime<Utc>,
    author: ConsumerIdentity,
    changes: &[ChangeRecord],
) -> Result<SequenceId, StoreError> {
    let changes = serde_json::to_string(changes)
        .map_err(|e| StoreError::IoFailure(format!("failed to encode change list: {}", e)))?;

    conn.execute(
        "INSERT INTO history (committed_at, author, changes) VALUES (?1, ?2, ?3)",
        params![committed_at.to_rfc3339(), author.as_str(), changes],
    )
    .map_err(map_sqlite_err)?;

    Ok(conn.last_insert_rowid() as SequenceId)
}

pub fn tail(conn: &Connection) -> Result<SequenceId, StoreError> {
    let tail: i64 = conn
        .query_row(
            "SELECT COALESCE((SELECT seq FROM sqlite_sequence WHERE name = 'history'), 0)",
            [],
            |row| row.get(0),
        )
        .map_err(map_sqlite_err)?;
    Ok(tail.max(0) as SequenceId)
}

pub fn stats(conn: &Connection) -> Result<LogStats, StoreError> {
    let (oldest, count): (Option<i64>, i64) = conn
        .query_row("SELECT MIN(seq), COUNT(*) FROM history", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .map_err(map_sqlite_err)?;

    Ok(LogStats {
        tail: tail(conn)?,
        oldest: oldest.map(|s| s as SequenceId),
        count: count as u64,
    })
}

/// Entries with `seq > after`, ascending, at most `limit`
pub fn entries_after(
    conn: &Connection,
    after: SequenceId,
    limit: usize,
) -> Result<Vec<LogRow>, StoreError> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT seq, committed_at, author, changes FROM history
             WHERE seq > ?1 ORDER BY seq ASC LIMIT ?2",
        )
        .map_err(map_sqlite_err)?;

    let rows = stmt
        .query_map(params![after as i64, limit as i64], |row| {
            Ok(LogRow {
                seq: row.get::<_, i64>(0)? as SequenceId,
                committed_at: row.get(1)?,
                author: row.get(2)?,
                changes: row.get(3)?,
            })
        })
        .map_err(map_sqlite_err)?;

    rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite_err)
}

pub fn committed_at(
    conn: &Connection,
    seq: SequenceId,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    let raw: Option<Value> = conn
        .query_row(
            "SELECT committed_at FROM history WHERE seq = ?1",
            params![seq as i64],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_sqlite_err)?;

    Ok(match raw {
        Some(Value::Text(s)) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    })
}

/// Delete every entry with `seq <= floor`, returning how many went
pub fn delete_through(conn: &Connection, floor: SequenceId) -> Result<usize, StoreError> {
    conn.execute("DELETE FROM history WHERE seq <= ?1", params![floor as i64])
        .map_err(map_sqlite_err)
}
