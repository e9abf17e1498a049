//! Append-only star collection with a staged spatial index.
//!
//! The store owns the only shared mutable state in the engine: the star
//! list and the pointer to the current index snapshot. Both sit behind one
//! `RwLock`, so a reader always sees an index and a staging buffer that
//! agree with each other.
//!
//! New stars land in the staging buffer and are recallable immediately.
//! A rebuild copies the star prefix in chunks (writers interleave between
//! chunks), builds a fresh k-d tree with no lock held, then swaps the
//! snapshot and drains exactly the staged ids it captured. Anything
//! scattered while the tree was building stays staged for the next cycle.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};

use crate::config::EngineConfig;
use crate::error::{CoreError, Result};
use crate::index::{IndexedPoint, KdTree};
use crate::record::{MAX_TAG_BYTES, MAX_TAGS, StarRecord};
use crate::spectrum::RainbowCode;
use crate::star::{Star, StarId, clamp_coordinates, clamp_unit};
use crate::time::now_unix_micros;

/// Stars copied per read-lock acquisition while capturing a rebuild.
const CAPTURE_CHUNK: usize = 4096;

/// One immutable generation of the spatial index.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    pub tree: KdTree,
    /// Largest `brightness * (1 + gravity)` among indexed stars.
    pub max_weight: f64,
    pub generation: u64,
}

/// Point-in-time counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreStats {
    pub total: usize,
    pub indexed: usize,
    pub staged: usize,
    pub generation: u64,
    pub rebuilding: bool,
}

/// Consistent read of the index plus everything not yet in it.
pub(crate) struct StoreView {
    pub index: Arc<IndexSnapshot>,
    pub staged: Vec<Arc<Star>>,
    pub total: usize,
}

struct StoreState {
    stars: Vec<Arc<Star>>,
    /// Ids scattered since the current index was captured, ascending.
    staging: Vec<StarId>,
    index: Arc<IndexSnapshot>,
    last_created_at: u64,
}

struct Shared {
    config: EngineConfig,
    state: RwLock<StoreState>,
    rebuilding: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Caller-owned star store. Cloning yields another handle to the same
/// stars; there is no global instance.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: RwLock::new(StoreState {
                    stars: Vec::new(),
                    staging: Vec::new(),
                    index: Arc::new(IndexSnapshot::default()),
                    last_created_at: 0,
                }),
                rebuilding: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Append a star. Weights are clamped to [0, 1], coordinates to
    /// [-1, 1]^4. The star is staged and immediately recallable.
    pub fn scatter<I, S>(
        &self,
        code: RainbowCode,
        coordinates: [f64; 4],
        brightness: f64,
        gravity: f64,
        tags: I,
    ) -> Arc<Star>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Ok(star) = self.scatter_with(code, coordinates, brightness, gravity, tags, |_| {
            Ok::<_, Infallible>(())
        });
        star
    }

    /// Like [`scatter`](Self::scatter), but the star only joins the store
    /// once `commit` accepts it. `commit` runs under the write lock, so the
    /// id it sees is the id the star keeps. On error nothing is appended
    /// and the id stays free.
    pub fn scatter_with<I, S, E>(
        &self,
        code: RainbowCode,
        coordinates: [f64; 4],
        brightness: f64,
        gravity: f64,
        tags: I,
        commit: impl FnOnce(&Star) -> std::result::Result<(), E>,
    ) -> std::result::Result<Arc<Star>, E>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags = normalize_tags(tags);
        let mut state = self.shared.state.write();
        let created_at = now_unix_micros().max(state.last_created_at + 1);
        let star = Self::prepare(
            StarId(state.stars.len() as u64),
            code,
            coordinates,
            brightness,
            gravity,
            tags,
            created_at,
        );
        commit(&star)?;
        Self::push(&mut state, Arc::clone(&star));
        Ok(star)
    }

    /// Re-append a persisted star, keeping its original timestamp.
    pub fn restore(&self, record: StarRecord) -> Arc<Star> {
        let tags = normalize_tags(&record.tags);
        let mut state = self.shared.state.write();
        let star = Self::prepare(
            StarId(state.stars.len() as u64),
            record.code,
            record.coordinates,
            record.brightness,
            record.gravity,
            tags,
            record.created_at,
        );
        Self::push(&mut state, Arc::clone(&star));
        star
    }

    /// Re-append a batch of records as consecutive stars, all or nothing.
    /// `commit` sees the stars with their final ids under the write lock;
    /// if it fails none of them are appended.
    pub fn restore_all_with<E>(
        &self,
        records: Vec<StarRecord>,
        commit: impl FnOnce(&[Arc<Star>]) -> std::result::Result<(), E>,
    ) -> std::result::Result<Vec<Arc<Star>>, E> {
        let mut state = self.shared.state.write();
        let first = state.stars.len() as u64;
        let stars: Vec<Arc<Star>> = records
            .into_iter()
            .enumerate()
            .map(|(offset, record)| {
                let tags = normalize_tags(&record.tags);
                Self::prepare(
                    StarId(first + offset as u64),
                    record.code,
                    record.coordinates,
                    record.brightness,
                    record.gravity,
                    tags,
                    record.created_at,
                )
            })
            .collect();
        commit(&stars)?;
        for star in &stars {
            Self::push(&mut state, Arc::clone(star));
        }
        Ok(stars)
    }

    fn prepare(
        id: StarId,
        code: RainbowCode,
        coordinates: [f64; 4],
        brightness: f64,
        gravity: f64,
        tags: BTreeSet<String>,
        created_at: u64,
    ) -> Arc<Star> {
        Arc::new(Star {
            id,
            code,
            coordinates: clamp_coordinates(coordinates),
            brightness: clamp_unit(brightness),
            gravity: clamp_unit(gravity),
            tags,
            created_at,
        })
    }

    fn push(state: &mut StoreState, star: Arc<Star>) {
        state.last_created_at = state.last_created_at.max(star.created_at);
        state.staging.push(star.id);
        state.stars.push(star);
    }

    pub fn len(&self) -> usize {
        self.shared.state.read().stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: StarId) -> Option<Arc<Star>> {
        self.shared.state.read().stars.get(id.0 as usize).cloned()
    }

    /// Look up several stars, failing on the first unknown id.
    pub fn get_many(&self, ids: &[StarId]) -> Result<Vec<Arc<Star>>> {
        let state = self.shared.state.read();
        ids.iter()
            .map(|id| {
                state
                    .stars
                    .get(id.0 as usize)
                    .cloned()
                    .ok_or(CoreError::UnknownStar(id.0))
            })
            .collect()
    }

    /// Every star, in id order.
    pub fn snapshot(&self) -> Vec<Arc<Star>> {
        self.shared.state.read().stars.clone()
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.shared.state.read();
        StoreStats {
            total: state.stars.len(),
            indexed: state.index.tree.len(),
            staged: state.staging.len(),
            generation: state.index.generation,
            rebuilding: self.shared.rebuilding.load(Ordering::Acquire),
        }
    }

    pub(crate) fn view(&self) -> StoreView {
        let state = self.shared.state.read();
        StoreView {
            index: Arc::clone(&state.index),
            staged: state
                .staging
                .iter()
                .map(|id| Arc::clone(&state.stars[id.0 as usize]))
                .collect(),
            total: state.stars.len(),
        }
    }

    /// Resolve ids returned by the index. Ids always come from this store,
    /// so unknown ones are simply dropped.
    pub(crate) fn resolve(&self, ids: &[StarId]) -> Vec<Arc<Star>> {
        let state = self.shared.state.read();
        ids.iter()
            .filter_map(|id| state.stars.get(id.0 as usize).cloned())
            .collect()
    }

    /// Start a background rebuild unless one is already running.
    /// Returns whether a new rebuild was started.
    pub fn request_rebuild(&self) -> bool {
        if self
            .shared
            .rebuilding
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let mut worker = self.shared.worker.lock();
        if let Some(finished) = worker.take() {
            let _ = finished.join();
        }

        let store = self.clone();
        let spawned = std::thread::Builder::new()
            .name("sm-index-rebuild".to_string())
            .spawn(move || {
                store.rebuild_locked_out();
                store.shared.rebuilding.store(false, Ordering::Release);
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                true
            }
            Err(e) => {
                tracing::warn!("failed to spawn index rebuild thread: {e}");
                self.shared.rebuilding.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Rebuild on the calling thread, waiting out any rebuild in flight.
    pub fn rebuild_now(&self) {
        loop {
            if self
                .shared
                .rebuilding
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
            self.wait_for_rebuild();
            std::thread::yield_now();
        }
        self.rebuild_locked_out();
        self.shared.rebuilding.store(false, Ordering::Release);
    }

    /// Block until the background rebuild (if any) has finished.
    pub fn wait_for_rebuild(&self) {
        let handle = self.shared.worker.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::error!("index rebuild thread panicked");
            self.shared.rebuilding.store(false, Ordering::Release);
        }
    }

    /// Teardown: let any in-flight rebuild finish, then drop this handle.
    pub fn close(self) {
        self.wait_for_rebuild();
    }

    /// Body of a rebuild. Caller holds the `rebuilding` flag.
    fn rebuild_locked_out(&self) {
        let (total, captured_staged, generation) = {
            let state = self.shared.state.read();
            (
                state.stars.len(),
                state.staging.len(),
                state.index.generation + 1,
            )
        };

        let mut points = Vec::with_capacity(total);
        let mut max_weight: f64 = 0.0;
        while points.len() < total {
            let state = self.shared.state.read();
            let end = (points.len() + CAPTURE_CHUNK).min(total);
            for star in &state.stars[points.len()..end] {
                max_weight = max_weight.max(star.weight());
                points.push(IndexedPoint {
                    id: star.id,
                    coordinates: star.coordinates,
                });
            }
        }

        let tree = KdTree::build_with_leaf_size(points, self.shared.config.leaf_size);

        let mut state = self.shared.state.write();
        state.index = Arc::new(IndexSnapshot {
            tree,
            max_weight,
            generation,
        });
        state.staging.drain(..captured_staged);
        tracing::debug!(
            generation,
            indexed = total,
            still_staged = state.staging.len(),
            "spatial index rebuilt"
        );
    }
}

/// Trim, drop empties, cap length (at a char boundary) and count.
fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .filter_map(|tag| {
            let tag = tag.as_ref().trim();
            if tag.is_empty() {
                return None;
            }
            let mut end = tag.len().min(MAX_TAG_BYTES);
            while !tag.is_char_boundary(end) {
                end -= 1;
            }
            Some(tag[..end].to_string())
        })
        .take(MAX_TAGS)
        .collect()
}
