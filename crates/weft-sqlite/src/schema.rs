use rusqlite::{Connection, OptionalExtension};
use weft_core::error::StoreError;
use weft_core::types::StoreId;

/// Schema version written by this build
pub const SCHEMA_VERSION: u32 = 2;

/// Random token identifying one incarnation of a store file
const NEW_GENERATION: &str = "lower(hex(randomblob(16)))";

/// Create tables if needed and verify the file belongs to `store`.
///
/// Called on every open by every process; all statements are idempotent.
pub fn init_schema(conn: &Connection, store: StoreId) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS store_meta (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            store_id TEXT NOT NULL,
            schema_version INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            generation TEXT
        );

        CREATE TABLE IF NOT EXISTS objects (
            kind TEXT NOT NULL,
            id TEXT NOT NULL,
            payload BLOB NOT NULL,
            PRIMARY KEY (kind, id)
        ) WITHOUT ROWID;

        CREATE TABLE IF NOT EXISTS history (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            committed_at TEXT NOT NULL,
            author TEXT NOT NULL,
            changes TEXT NOT NULL
        );",
    )
    .map_err(|e| StoreError::OpenFailed(e.to_string()))?;

    if !has_generation_column(conn)? {
        upgrade_v1(conn)?;
    }

    conn.execute(
        &format!(
            "INSERT OR IGNORE INTO store_meta (id, store_id, schema_version, generation)
             VALUES (0, ?1, ?2, {})",
            NEW_GENERATION
        ),
        rusqlite::params![store.as_str(), SCHEMA_VERSION as i64],
    )
    .map_err(|e| StoreError::OpenFailed(e.to_string()))?;

    let (stored_id, version): (String, i64) = conn
        .query_row(
            "SELECT store_id, schema_version FROM store_meta WHERE id = 0",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|e| StoreError::OpenFailed(e.to_string()))?;

    if stored_id != store.as_str() {
        return Err(StoreError::OpenFailed(format!(
            "File belongs to store '{}', expected '{}'",
            stored_id, store
        )));
    }

    if version as u32 > SCHEMA_VERSION {
        return Err(StoreError::OpenFailed(format!(
            "Store schema version {} is newer than supported version {}",
            version, SCHEMA_VERSION
        )));
    }

    Ok(())
}

fn has_generation_column(conn: &Connection) -> Result<bool, StoreError> {
    conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info('store_meta') WHERE name = 'generation'",
        [],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
    .map_err(|e| StoreError::OpenFailed(e.to_string()))
}

/// Version 1 files predate the generation column
fn upgrade_v1(conn: &Connection) -> Result<(), StoreError> {
    let open_err = |e: rusqlite::Error| StoreError::OpenFailed(e.to_string());

    // Another process may be upgrading the same file
    conn.execute_batch("BEGIN IMMEDIATE").map_err(open_err)?;
    let result = (|| -> Result<(), StoreError> {
        if !has_generation_column(conn)? {
            conn.execute_batch("ALTER TABLE store_meta ADD COLUMN generation TEXT")
                .map_err(open_err)?;
        }
        conn.execute_batch(&format!(
            "UPDATE store_meta SET generation = {} WHERE id = 0 AND generation IS NULL;
             UPDATE store_meta SET schema_version = {} WHERE id = 0 AND schema_version < {};",
            NEW_GENERATION, SCHEMA_VERSION, SCHEMA_VERSION
        ))
        .map_err(open_err)
    })();

    if let Err(e) = result {
        let _ = conn.execute_batch("ROLLBACK");
        return Err(e);
    }
    conn.execute_batch("COMMIT").map_err(open_err)?;

    tracing::info!(version = SCHEMA_VERSION, "Upgraded store schema");
    Ok(())
}

/// Generation token of the store file.
///
/// Assigned once when the file is created; a store rebuilt from scratch gets
/// a new one, which tells consumers their checkpoints no longer apply.
pub fn generation(conn: &Connection) -> Result<String, StoreError> {
    conn.query_row(
        "SELECT generation FROM store_meta WHERE id = 0 AND generation IS NOT NULL",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StoreError::IoFailure(e.to_string()))
}

/// Read the stored schema version, if the meta table exists
pub fn schema_version(conn: &Connection) -> Result<Option<u32>, StoreError> {
    conn.query_row(
        "SELECT schema_version FROM store_meta WHERE id = 0",
        [],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.map(|v| v as u32))
    .map_err(|e| StoreError::IoFailure(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, StoreId::Main).unwrap();
        init_schema(&conn, StoreId::Main).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_generation_is_stable_per_file() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, StoreId::Main).unwrap();
        let first = generation(&conn).unwrap();
        init_schema(&conn, StoreId::Main).unwrap();
        assert_eq!(generation(&conn).unwrap(), first);
        assert_eq!(first.len(), 32);

        let other = Connection::open_in_memory().unwrap();
        init_schema(&other, StoreId::Main).unwrap();
        assert_ne!(generation(&other).unwrap(), first);
    }

    #[test]
    fn test_upgrades_version_one_file() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE store_meta (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                store_id TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            INSERT INTO store_meta (id, store_id, schema_version) VALUES (0, 'main', 1);",
        )
        .unwrap();

        init_schema(&conn, StoreId::Main).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
        assert!(!generation(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_foreign_store_file() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, StoreId::Main).unwrap();

        let err = init_schema(&conn, StoreId::Media).unwrap_err();
        assert!(matches!(err, StoreError::OpenFailed(_)));
    }

    #[test]
    fn test_rejects_newer_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, StoreId::Main).unwrap();
        conn.execute("UPDATE store_meta SET schema_version = 99 WHERE id = 0", [])
            .unwrap();

        assert!(matches!(
            init_schema(&conn, StoreId::Main),
            Err(StoreError::OpenFailed(_))
        ));
    }
}
