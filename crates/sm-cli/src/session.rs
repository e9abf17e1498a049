//! A loaded engine paired with the SQLite log that backs it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use sm_core::{EngineConfig, FeatureSource, MemoryEngine, Star, StarRecord};
use sm_store::{Store, database_path, export_file, import_file, load_config};

pub struct Session {
    engine: MemoryEngine,
    store: Store,
    data_dir: Option<PathBuf>,
}

impl Session {
    /// Open `<data_dir>`, creating it if needed, and load every star.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let config = load_config(data_dir).context("failed to load config")?;
        let db_path = database_path(data_dir);
        let store = Store::open(&db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;

        let session = Self::with_store(store, config, Some(data_dir.to_path_buf()))?;
        tracing::debug!(
            stars = session.engine.stats().total,
            data_dir = %data_dir.display(),
            "session opened"
        );
        Ok(session)
    }

    pub fn open_in_memory(config: EngineConfig) -> Result<Self> {
        let store = Store::open_in_memory().context("failed to open in-memory store")?;
        Self::with_store(store, config, None)
    }

    fn with_store(store: Store, config: EngineConfig, data_dir: Option<PathBuf>) -> Result<Self> {
        let engine = MemoryEngine::new(config);
        store
            .load_into(engine.store())
            .context("failed to load stars")?;
        Ok(Self {
            engine,
            store,
            data_dir,
        })
    }

    pub fn engine(&self) -> &MemoryEngine {
        &self.engine
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Remember one memory. The star joins the engine only after its row
    /// is written, so a failed write leaves both sides unchanged.
    pub fn remember(
        &self,
        features: &impl FeatureSource,
        brightness: f64,
        gravity: f64,
        tags: &[String],
    ) -> Result<Arc<Star>> {
        self.engine
            .remember_with(features, brightness, gravity, tags, |star| {
                self.store.append_star(star)
            })
            .context("failed to persist star")
    }

    /// Write every star to a flat record file. Returns the count.
    pub fn export(&self, path: &Path) -> Result<usize> {
        let records: Vec<StarRecord> = self
            .engine
            .store()
            .snapshot()
            .iter()
            .map(|s| StarRecord::from(s.as_ref()))
            .collect();
        export_file(path, &records)
            .with_context(|| format!("failed to export {}", path.display()))?;
        Ok(records.len())
    }

    /// Append every record in a flat file as new stars. Nothing is
    /// kept, on disk or in memory, unless every record is written.
    pub fn import(&self, path: &Path) -> Result<usize> {
        let records =
            import_file(path).with_context(|| format!("failed to import {}", path.display()))?;
        let stars = self
            .engine
            .store()
            .restore_all_with(records, |stars| self.store.append_stars(stars))
            .context("failed to persist imported stars")?;
        Ok(stars.len())
    }

    /// Let background work finish and checkpoint the WAL.
    pub fn close(self) {
        self.engine.close();
        if let Err(e) = self.store.checkpoint_truncate() {
            tracing::warn!("WAL checkpoint failed: {e}");
        }
    }
}
