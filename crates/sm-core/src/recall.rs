//! Resonance scoring and top-K recall.
//!
//! `score = brightness / (1 + distance²) · (1 + gravity)`
//!
//! Strategy is chosen by [`RecallPolicy`], never by the caller:
//!
//! | store size                  | strategy                                |
//! |-----------------------------|-----------------------------------------|
//! | `< linear_scan_threshold`   | linear scan of every star               |
//! | otherwise                   | index range query + linear scan of staging |
//!
//! The index path is exact, not approximate: the range-query radius is the
//! largest distance at which any indexed star could still clear the
//! threshold, so both strategies return the same hits in the same order.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::constants::DEADLINE_CHUNK;
use crate::star::{Star, squared_distance};
use crate::store::{MemoryStore, StoreView};
use crate::wave::WavePattern;

/// Chunks smaller than this are scored on the calling thread.
const PARALLEL_MIN: usize = 64;

/// Point in the star field to recall around.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Query {
    pub coordinates: [f64; 4],
}

impl Query {
    /// Non-finite components are replaced with 0.
    pub fn at(coordinates: [f64; 4]) -> Self {
        Self {
            coordinates: coordinates.map(|c| if c.is_finite() { c } else { 0.0 }),
        }
    }
}

impl From<[f64; 4]> for Query {
    fn from(coordinates: [f64; 4]) -> Self {
        Self::at(coordinates)
    }
}

impl From<&WavePattern> for Query {
    fn from(wave: &WavePattern) -> Self {
        Self::at(wave.coordinates())
    }
}

impl From<WavePattern> for Query {
    fn from(wave: WavePattern) -> Self {
        Self::at(wave.coordinates())
    }
}

/// Resonance between a query point and one star. Pure.
pub fn resonance(query: &[f64; 4], star: &Star) -> f64 {
    let distance_sq = squared_distance(query, &star.coordinates);
    star.brightness / (1.0 + distance_sq) * (1.0 + star.gravity)
}

/// Score a batch on the calling thread.
pub fn score_batch(query: &[f64; 4], stars: &[Arc<Star>]) -> Vec<f64> {
    stars.iter().map(|s| resonance(query, s)).collect()
}

/// Score a batch across the rayon pool. Items are independent, so the
/// output matches [`score_batch`] exactly.
pub fn score_batch_par(query: &[f64; 4], stars: &[Arc<Star>]) -> Vec<f64> {
    stars.par_iter().map(|s| resonance(query, s)).collect()
}

/// How candidates are gathered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallStrategy {
    LinearScan,
    Indexed,
}

/// Size and staleness rules for recall.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecallPolicy {
    pub linear_scan_threshold: usize,
    pub rebuild_ratio: f64,
    pub min_staged_for_rebuild: usize,
}

impl RecallPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            linear_scan_threshold: config.linear_scan_threshold,
            rebuild_ratio: config.rebuild_ratio,
            min_staged_for_rebuild: config.min_staged_for_rebuild,
        }
    }

    pub fn select(&self, total: usize) -> RecallStrategy {
        if total < self.linear_scan_threshold {
            RecallStrategy::LinearScan
        } else {
            RecallStrategy::Indexed
        }
    }

    /// Staging has outgrown `max(min_staged, ratio × indexed)`.
    pub fn is_stale(&self, indexed: usize, staged: usize) -> bool {
        let limit = (self.min_staged_for_rebuild as f64).max(self.rebuild_ratio * indexed as f64);
        staged as f64 > limit
    }
}

/// Internal signal that staging has outgrown the index. Handled by
/// requesting a rebuild; never returned to callers.
#[derive(Debug)]
struct IndexStale {
    indexed: usize,
    staged: usize,
}

fn check_fresh(policy: &RecallPolicy, view: &StoreView) -> Result<(), IndexStale> {
    let indexed = view.index.tree.len();
    let staged = view.staged.len();
    if policy.is_stale(indexed, staged) {
        Err(IndexStale { indexed, staged })
    } else {
        Ok(())
    }
}

/// Largest distance at which a star of weight `max_weight` still scores
/// `threshold`, padded so float rounding can only widen the candidate set.
fn search_radius(threshold: f64, max_weight: f64) -> f64 {
    if threshold <= 0.0 {
        return f64::INFINITY;
    }
    let reach_sq = (max_weight / threshold - 1.0).max(0.0);
    (reach_sq * (1.0 + 1e-9) + 1e-9).sqrt()
}

/// One recalled star.
#[derive(Clone, Debug)]
pub struct Resonance {
    pub star: Arc<Star>,
    pub score: f64,
}

/// Recall hits plus how they were produced.
#[derive(Clone, Debug)]
pub struct RecallReport {
    pub hits: Vec<Resonance>,
    pub strategy: RecallStrategy,
    /// Candidates gathered before scoring.
    pub candidates: usize,
    /// Candidates actually scored (less than `candidates` if partial).
    pub scored: usize,
    /// The deadline cut scoring short.
    pub partial: bool,
}

impl RecallReport {
    fn empty(strategy: RecallStrategy) -> Self {
        Self {
            hits: Vec::new(),
            strategy,
            candidates: 0,
            scored: 0,
            partial: false,
        }
    }
}

/// Recall over a [`MemoryStore`].
pub struct ResonanceRecall<'a> {
    store: &'a MemoryStore,
    policy: RecallPolicy,
}

impl<'a> ResonanceRecall<'a> {
    pub fn new(store: &'a MemoryStore) -> Self {
        Self {
            store,
            policy: RecallPolicy::from_config(store.config()),
        }
    }

    pub fn with_policy(store: &'a MemoryStore, policy: RecallPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RecallPolicy {
        &self.policy
    }

    /// Top `top_k` stars scoring at least `max(threshold, 0)`, best first.
    /// Ties go to the earlier star. Never fails; empty when nothing
    /// qualifies.
    pub fn recall(
        &self,
        query: impl Into<Query>,
        threshold: f64,
        top_k: usize,
        deadline: Option<Instant>,
    ) -> Vec<Resonance> {
        self.recall_report(query, threshold, top_k, deadline).hits
    }

    pub fn recall_report(
        &self,
        query: impl Into<Query>,
        threshold: f64,
        top_k: usize,
        deadline: Option<Instant>,
    ) -> RecallReport {
        let query = query.into();
        let threshold = if threshold.is_nan() { 0.0 } else { threshold.max(0.0) };

        let view = self.store.view();
        let strategy = self.policy.select(view.total);
        if view.total == 0 || top_k == 0 {
            return RecallReport::empty(strategy);
        }

        let candidates = match strategy {
            RecallStrategy::LinearScan => self.store.snapshot(),
            RecallStrategy::Indexed => {
                if let Err(stale) = check_fresh(&self.policy, &view) {
                    tracing::debug!(
                        indexed = stale.indexed,
                        staged = stale.staged,
                        "spatial index stale, requesting rebuild"
                    );
                    self.store.request_rebuild();
                }
                let radius = search_radius(threshold, view.index.max_weight);
                let ids = view.index.tree.range_query(&query.coordinates, radius);
                let mut candidates = self.store.resolve(&ids);
                candidates.extend(view.staged);
                candidates
            }
        };

        let (mut hits, scored, partial) =
            score_until(&query.coordinates, &candidates, threshold, deadline);
        if partial {
            tracing::debug!(
                scored,
                total = candidates.len(),
                "recall deadline reached, returning partial results"
            );
        }

        rank(&mut hits);
        hits.truncate(top_k);

        RecallReport {
            hits,
            strategy,
            candidates: candidates.len(),
            scored,
            partial,
        }
    }
}

/// Score candidates chunk by chunk, stopping at the deadline. Returns the
/// qualifying hits, how many candidates were scored, and whether scoring
/// stopped early.
fn score_until(
    query: &[f64; 4],
    candidates: &[Arc<Star>],
    threshold: f64,
    deadline: Option<Instant>,
) -> (Vec<Resonance>, usize, bool) {
    let mut hits = Vec::new();
    let mut scored = 0;

    for chunk in candidates.chunks(DEADLINE_CHUNK) {
        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            return (hits, scored, true);
        }

        let scores = if chunk.len() >= PARALLEL_MIN {
            score_batch_par(query, chunk)
        } else {
            score_batch(query, chunk)
        };
        hits.extend(
            chunk
                .iter()
                .zip(scores)
                .filter(|(_, score)| *score >= threshold)
                .map(|(star, score)| Resonance {
                    star: Arc::clone(star),
                    score,
                }),
        );
        scored += chunk.len();
    }

    (hits, scored, false)
}

/// Score descending, then creation ascending, then id ascending.
fn rank(hits: &mut [Resonance]) {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.star.created_at.cmp(&b.star.created_at))
            .then_with(|| a.star.id.cmp(&b.star.id))
    });
}
