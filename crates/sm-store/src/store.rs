use std::path::Path;
use std::sync::Arc;

use rusqlite::{Connection, params};

use sm_core::{MemoryStore, Star, StarRecord};

use crate::error::{Result, StoreError};
use crate::schema;

/// SQLite-backed star log. Each row holds one encoded [`StarRecord`] keyed
/// by the star's id in the in-memory store.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM metadata WHERE key = ?1")?;
        let result = stmt.query_row([key], |row| row.get(0)).ok();
        Ok(result)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // --- Append ---

    pub fn append_star(&self, star: &Star) -> Result<()> {
        insert_on(&self.conn, star)
    }

    /// Append many stars in one transaction. All or nothing.
    pub fn append_stars(&self, stars: &[Arc<Star>]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for star in stars {
            insert_on(&tx, star)?;
        }
        tx.commit()?;
        tracing::debug!(count = stars.len(), "appended stars");
        Ok(())
    }

    // --- Load ---

    pub fn star_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM stars", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Every persisted record in id order. The first undecodable row fails
    /// the whole load.
    pub fn load_stars(&self) -> Result<Vec<StarRecord>> {
        Ok(self
            .load_rows()?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    /// Restore every persisted star into an empty `MemoryStore` and build
    /// its index. Returns the number restored.
    pub fn load_into(&self, target: &MemoryStore) -> Result<usize> {
        if !target.is_empty() {
            return Err(StoreError::InvalidData(format!(
                "cannot load into a store that already holds {} stars",
                target.len()
            )));
        }

        let rows = self.load_rows()?;
        let count = rows.len();
        for (id, record) in rows {
            let star = target.restore(record);
            if star.id.0 != id {
                return Err(StoreError::InvalidData(format!(
                    "star ids are not contiguous: row {id} restored as {}",
                    star.id
                )));
            }
        }
        target.rebuild_now();

        tracing::info!(stars = count, "loaded star store");
        Ok(count)
    }

    // --- Maintenance ---

    /// Database size in bytes (page count × page size).
    pub fn db_size(&self) -> Result<u64> {
        let pages: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((pages * page_size) as u64)
    }

    /// Fold the WAL into the main file and truncate it.
    pub fn checkpoint_truncate(&self) -> Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }

    fn load_rows(&self) -> Result<Vec<(u64, StarRecord)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, record FROM stars ORDER BY id")?;
        let rows: Vec<(i64, Vec<u8>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;

        rows.into_iter()
            .map(|(id, blob)| {
                let (record, used) = StarRecord::decode(&blob)?;
                if used != blob.len() {
                    return Err(StoreError::InvalidData(format!(
                        "star {id}: {} trailing bytes in record",
                        blob.len() - used
                    )));
                }
                Ok((id as u64, record))
            })
            .collect()
    }
}

fn insert_on(conn: &Connection, star: &Star) -> Result<()> {
    let record = StarRecord::from(star);
    conn.execute(
        "INSERT INTO stars (id, record, created_at) VALUES (?1, ?2, ?3)",
        params![star.id.0 as i64, record.encode(), star.created_at as i64],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sm_core::{EngineConfig, Features, MemoryEngine, StarId};

    fn engine_with(n: usize) -> MemoryEngine {
        let engine = MemoryEngine::new(EngineConfig::default());
        for i in 0..n {
            let t = i as f64 / n.max(1) as f64;
            engine.remember(
                &Features::new([1.0 - t, t, 0.5 - t, 0.25]),
                0.5,
                0.25,
                [format!("star-{i}"), "shared".to_string()],
            );
        }
        engine
    }

    #[test]
    fn test_append_and_count() {
        let store = Store::open_in_memory().unwrap();
        let engine = engine_with(3);
        for star in engine.store().snapshot() {
            store.append_star(&star).unwrap();
        }
        assert_eq!(store.star_count().unwrap(), 3);
    }

    #[test]
    fn test_append_stars_is_transactional() {
        let store = Store::open_in_memory().unwrap();
        let engine = engine_with(4);
        let stars = engine.store().snapshot();
        store.append_star(&stars[2]).unwrap();

        // Duplicate id 2 aborts the batch
        assert!(store.append_stars(&stars).is_err());
        assert_eq!(store.star_count().unwrap(), 1);
    }

    #[test]
    fn test_load_restores_records() {
        let store = Store::open_in_memory().unwrap();
        let engine = engine_with(5);
        let stars = engine.store().snapshot();
        store.append_stars(&stars).unwrap();

        let records = store.load_stars().unwrap();
        assert_eq!(records.len(), 5);
        for (record, star) in records.iter().zip(&stars) {
            assert_eq!(record.code, star.code);
            assert_eq!(record.tags, star.tags);
            assert_eq!(record.created_at, star.created_at);
            for (a, b) in record.coordinates.iter().zip(star.coordinates) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_load_into_rebuilds_index() {
        let store = Store::open_in_memory().unwrap();
        let engine = engine_with(40);
        store.append_stars(&engine.store().snapshot()).unwrap();

        let target = MemoryStore::new(EngineConfig::default());
        assert_eq!(store.load_into(&target).unwrap(), 40);
        let stats = target.stats();
        assert_eq!(stats.total, 40);
        assert_eq!(stats.indexed, 40);
        assert_eq!(stats.staged, 0);
        assert_eq!(target.get(StarId(7)).unwrap().tags.len(), 2);
    }

    #[test]
    fn test_load_into_requires_empty_target() {
        let store = Store::open_in_memory().unwrap();
        let engine = engine_with(2);
        store.append_stars(&engine.store().snapshot()).unwrap();
        assert!(matches!(
            store.load_into(engine.store()),
            Err(StoreError::InvalidData(_))
        ));
    }

    #[test]
    fn test_gap_in_ids_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let engine = engine_with(3);
        let stars = engine.store().snapshot();
        store.append_star(&stars[0]).unwrap();
        store.append_star(&stars[2]).unwrap();

        let target = MemoryStore::new(EngineConfig::default());
        assert!(store.load_into(&target).is_err());
    }

    #[test]
    fn test_corrupt_row_fails_load() {
        let store = Store::open_in_memory().unwrap();
        let engine = engine_with(2);
        store.append_stars(&engine.store().snapshot()).unwrap();
        store
            .conn()
            .execute("UPDATE stars SET record = x'0900' WHERE id = 1", [])
            .unwrap();

        assert!(matches!(store.load_stars(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_metadata() {
        let store = Store::open_in_memory().unwrap();

        assert!(store.get_metadata("foo").unwrap().is_none());

        store.set_metadata("foo", "bar").unwrap();
        assert_eq!(store.get_metadata("foo").unwrap(), Some("bar".to_string()));

        store.set_metadata("foo", "baz").unwrap();
        assert_eq!(store.get_metadata("foo").unwrap(), Some("baz".to_string()));
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stars.db");
        let engine = engine_with(6);
        {
            let store = Store::open(&path).unwrap();
            store.append_stars(&engine.store().snapshot()).unwrap();
        }
        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.star_count().unwrap(), 6);
    }

    #[test]
    fn test_checkpoint_empties_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stars.db");
        let store = Store::open(&path).unwrap();
        store
            .append_stars(&engine_with(10).store().snapshot())
            .unwrap();
        assert!(store.db_size().unwrap() > 0);

        store.checkpoint_truncate().unwrap();
        let wal = path.with_extension("db-wal");
        if wal.exists() {
            assert_eq!(std::fs::metadata(&wal).unwrap().len(), 0);
        }
    }

    #[test]
    fn test_empty_db_loads_nothing() {
        let store = Store::open_in_memory().unwrap();
        let target = MemoryStore::new(EngineConfig::default());
        assert_eq!(store.load_into(&target).unwrap(), 0);
        assert!(target.is_empty());
    }
}
