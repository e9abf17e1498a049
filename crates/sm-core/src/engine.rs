//! Caller-owned facade over encoding, storage, recall and constellations.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::constellation::{Constellation, ConstellationFormer};
use crate::encoder::{Encoder, FeatureSource};
use crate::error::Result;
use crate::recall::{Query, RecallStrategy, Resonance, ResonanceRecall};
use crate::spectrum::SpectrumCompressor;
use crate::star::{Star, StarId};
use crate::store::{MemoryStore, StoreStats};
use crate::wave::WavePattern;

/// One recalled memory, decompressed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecallHit {
    pub id: StarId,
    pub tags: Vec<String>,
    pub brightness: f64,
    pub score: f64,
    /// Approximate reconstruction of the remembered wave.
    pub approx: WavePattern,
}

#[derive(Clone, Debug, Serialize)]
pub struct RecallOutcome {
    pub hits: Vec<RecallHit>,
    pub strategy: RecallStrategy,
    pub candidates: usize,
    pub partial: bool,
    /// Hits dropped because their code would not decompress.
    pub skipped: usize,
}

pub struct MemoryEngine {
    store: MemoryStore,
}

impl MemoryEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(MemoryStore::new(config))
    }

    pub fn with_store(store: MemoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        self.store.config()
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Encode, compress and scatter one memory at its orientation.
    pub fn remember<I, S>(
        &self,
        features: &impl FeatureSource,
        brightness: f64,
        gravity: f64,
        tags: I,
    ) -> Arc<Star>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wave = Encoder::encode(features);
        let code = SpectrumCompressor::compress(&wave);
        self.store.scatter(code, wave.coordinates(), brightness, gravity, tags)
    }

    /// [`remember`](Self::remember), but the star is only kept once
    /// `commit` (typically a durable write) succeeds.
    pub fn remember_with<I, S, E>(
        &self,
        features: &impl FeatureSource,
        brightness: f64,
        gravity: f64,
        tags: I,
        commit: impl FnOnce(&Star) -> std::result::Result<(), E>,
    ) -> std::result::Result<Arc<Star>, E>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wave = Encoder::encode(features);
        let code = SpectrumCompressor::compress(&wave);
        self.store.scatter_with(code, wave.coordinates(), brightness, gravity, tags, commit)
    }

    /// Recall memories resonating with `features`.
    pub fn recall(
        &self,
        features: &impl FeatureSource,
        threshold: f64,
        top_k: usize,
        deadline: Option<Instant>,
    ) -> Vec<RecallHit> {
        self.recall_at(Encoder::encode(features), threshold, top_k, deadline).hits
    }

    /// Recall around an explicit query point. Stars whose code will not
    /// decompress are skipped before the `top_k` cut, so they never take
    /// the place of a qualifying star.
    pub fn recall_at(
        &self,
        query: impl Into<Query>,
        threshold: f64,
        top_k: usize,
        deadline: Option<Instant>,
    ) -> RecallOutcome {
        let limit = if top_k == 0 { 0 } else { usize::MAX };
        let report =
            ResonanceRecall::new(&self.store).recall_report(query, threshold, limit, deadline);

        let mut hits = Vec::with_capacity(top_k.min(report.hits.len()));
        let mut skipped = 0;
        for resonance in report.hits {
            if hits.len() == top_k {
                break;
            }
            match to_hit(resonance) {
                Some(hit) => hits.push(hit),
                None => skipped += 1,
            }
        }

        RecallOutcome {
            skipped,
            hits,
            strategy: report.strategy,
            candidates: report.candidates,
            partial: report.partial,
        }
    }

    /// Group the given stars into constellations. Fails if any id is
    /// unknown to this engine's store.
    pub fn form_constellation(
        &self,
        star_ids: &[StarId],
        connection_distance: f64,
    ) -> Result<Vec<Constellation>> {
        let stars = self.store.get_many(star_ids)?;
        Ok(ConstellationFormer::new(&self.config().tones).form(&stars, connection_distance))
    }

    /// Let any background work finish.
    pub fn close(self) {
        self.store.close();
    }
}

fn to_hit(resonance: Resonance) -> Option<RecallHit> {
    let star = resonance.star;
    match SpectrumCompressor::decompress(&star.code) {
        Ok(approx) => Some(RecallHit {
            id: star.id,
            tags: star.tags.iter().cloned().collect(),
            brightness: star.brightness,
            score: resonance.score,
            approx,
        }),
        Err(e) => {
            tracing::warn!(star = %star.id, "skipping recalled star: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CODE_LEN, ROUND_TRIP_BOUND};
    use crate::encoder::Features;
    use crate::error::CoreError;
    use crate::record::StarRecord;
    use crate::spectrum::RainbowCode;
    use approx::assert_abs_diff_eq;

    fn engine() -> MemoryEngine {
        MemoryEngine::new(EngineConfig::default())
    }

    #[test]
    fn test_self_recall_ranks_first() {
        let engine = engine();
        engine.remember(&[0.9, -0.1, 0.2, 0.3], 0.4, 0.0, ["other"]);
        let target = Features::new([0.1, 0.8, -0.4, 0.2]);
        let star = engine.remember(&target, 0.7, 0.0, ["target"]);
        engine.remember(&[-0.5, -0.5, 0.5, 0.1], 0.6, 0.0, ["third"]);

        let hits = engine.recall(&target, 0.0, 3, None);
        assert_eq!(hits[0].id, star.id);
        assert_abs_diff_eq!(hits[0].score, star.brightness, epsilon = 1e-12);
        assert_eq!(hits[0].tags, vec!["target".to_string()]);
    }

    #[test]
    fn test_recall_returns_faithful_approximation() {
        let engine = engine();
        let features = Features::new([0.3, 0.6, 0.2, 0.7]);
        engine.remember(&features, 0.9, 0.0, ["a"]);
        let hits = engine.recall(&features, 0.5, 5, None);
        assert_eq!(hits.len(), 1);

        let original = Encoder::encode(&features);
        let distance = original
            .orientation
            .angular_distance(hits[0].approx.orientation);
        assert!(distance < ROUND_TRIP_BOUND, "distance {distance}");
    }

    #[test]
    fn test_malformed_code_is_skipped() {
        let engine = engine();
        let good = engine.remember(&[1.0, 0.0, 0.0, 0.0], 0.5, 0.0, ["good"]);

        let mut raw = [0u8; CODE_LEN];
        raw[0..4].copy_from_slice(&f32::NAN.to_le_bytes());
        engine.store().restore(StarRecord {
            code: RainbowCode::from_bytes(raw),
            coordinates: good.coordinates,
            brightness: 1.0,
            gravity: 0.0,
            tags: ["bad".to_string()].into(),
            created_at: 1,
        });

        let outcome = engine.recall_at(good.coordinates, 0.0, 10, None);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].id, good.id);
    }

    #[test]
    fn test_malformed_code_does_not_crowd_out_top_k() {
        let engine = engine();
        let good = engine.remember(&[1.0, 0.0, 0.0, 0.0], 0.5, 0.0, ["good"]);

        let mut raw = [0u8; CODE_LEN];
        raw[0..4].copy_from_slice(&f32::NAN.to_le_bytes());
        engine.store().restore(StarRecord {
            code: RainbowCode::from_bytes(raw),
            coordinates: good.coordinates,
            brightness: 1.0,
            gravity: 0.0,
            tags: ["bad".to_string()].into(),
            created_at: 1,
        });

        let outcome = engine.recall_at(good.coordinates, 0.0, 1, None);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].id, good.id);
    }

    #[test]
    fn test_zero_top_k_recalls_nothing() {
        let engine = engine();
        let star = engine.remember(&[1.0, 0.0, 0.0, 0.0], 0.5, 0.0, ["x"]);
        let outcome = engine.recall_at(star.coordinates, 0.0, 0, None);
        assert!(outcome.hits.is_empty());
        assert_eq!(outcome.skipped, 0);
    }

    #[test]
    fn test_form_constellation_rejects_unknown_ids() {
        let engine = engine();
        let star = engine.remember(&[0.5, 0.5, 0.5, 0.5], 0.5, 0.5, ["x"]);
        assert!(engine.form_constellation(&[star.id], 0.5).is_ok());
        assert_eq!(
            engine.form_constellation(&[star.id, StarId(42)], 0.5),
            Err(CoreError::UnknownStar(42))
        );
    }

    #[test]
    fn test_form_constellation_labels_tone() {
        let engine = engine();
        let a = engine.remember(&[0.7, 0.7, 0.0, 0.0], 0.5, 0.5, ["a"]);
        let b = engine.remember(&[0.7, 0.6, 0.1, 0.0], 0.5, 0.5, ["b"]);
        let out = engine.form_constellation(&[b.id, a.id], 0.5).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].members, vec![a.id, b.id]);
        assert_eq!(out[0].tone.as_deref(), Some("joyful"));
    }
}
