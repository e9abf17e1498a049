use rusqlite::Connection;

use crate::error::{Result, StoreError};

pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    // Small WAL: checkpoint roughly every 400KB
    conn.pragma_update(None, "wal_autocheckpoint", 100)?;

    // Fails harmlessly on in-memory and fresh databases.
    if conn
        .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
        .is_ok()
    {
        tracing::debug!("startup WAL checkpoint complete");
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stars (
            id         INTEGER PRIMARY KEY,
            record     BLOB NOT NULL,
            created_at INTEGER NOT NULL
        );
        ",
    )?;

    if let Some(existing) = get_schema_version(conn)?
        && existing > SCHEMA_VERSION
    {
        return Err(StoreError::InvalidData(format!(
            "database schema v{existing} is newer than supported v{SCHEMA_VERSION}"
        )));
    }

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}
