//! Property tests for the compression bound, score monotonicity,
//! index/linear equivalence and constellation determinism.

use std::sync::Arc;

use proptest::prelude::*;
use sm_core::{
    ConstellationFormer, EngineConfig, MemoryStore, Orientation, ROUND_TRIP_BOUND, RainbowCode,
    RecallPolicy, ResonanceRecall, SpectrumCompressor, Star, StarId, WavePattern, default_tones,
    resonance,
};

fn unit() -> impl Strategy<Value = f64> {
    -1.0f64..=1.0
}

fn point() -> impl Strategy<Value = [f64; 4]> {
    [unit(), unit(), unit(), unit()]
}

fn code() -> RainbowCode {
    SpectrumCompressor::compress(&WavePattern::new(Orientation::canonical(), 1.0, 0.5, 0.0))
}

proptest! {
    #[test]
    fn round_trip_stays_within_bound(
        components in point(),
        energy in 0.0f64..10.0,
        frequency in 0.0f64..=1.0,
        phase in -10.0f64..10.0,
    ) {
        let orientation = Orientation::from_array(components);
        let wave = WavePattern::new(orientation, energy, frequency, phase);
        let code = SpectrumCompressor::compress(&wave);
        let restored = SpectrumCompressor::decompress(&code).unwrap();
        let distance = wave.orientation.angular_distance(restored.orientation);
        prop_assert!(distance < ROUND_TRIP_BOUND, "distance {}", distance);
    }

    #[test]
    fn score_never_increases_with_distance(
        brightness in 0.0f64..=1.0,
        gravity in 0.0f64..=1.0,
        direction in point(),
        near in 0.0f64..2.0,
        extra in 0.0f64..2.0,
    ) {
        let norm = direction.iter().map(|c| c * c).sum::<f64>().sqrt();
        prop_assume!(norm > 1e-6);
        let at = |scale: f64| Star {
            id: StarId(0),
            code: code(),
            coordinates: direction.map(|c| c / norm * scale),
            brightness,
            gravity,
            tags: Default::default(),
            created_at: 0,
        };
        let closer = resonance(&[0.0; 4], &at(near));
        let farther = resonance(&[0.0; 4], &at(near + extra));
        prop_assert!(farther <= closer + 1e-12);
    }

    #[test]
    fn index_and_linear_return_the_same_hits(
        stars in prop::collection::vec((point(), 0.0f64..=1.0, 0.0f64..=1.0), 1..300),
        staged in prop::collection::vec((point(), 0.0f64..=1.0, 0.0f64..=1.0), 0..20),
        probe in point(),
        threshold in 0.0f64..1.5,
        top_k in 1usize..40,
    ) {
        let store = MemoryStore::new(EngineConfig::default());
        for (coords, b, g) in &stars {
            store.scatter(code(), *coords, *b, *g, ["p"]);
        }
        store.rebuild_now();
        for (coords, b, g) in &staged {
            store.scatter(code(), *coords, *b, *g, ["s"]);
        }

        let base = RecallPolicy::from_config(store.config());
        // Neither policy may rebuild behind our back
        let linear = RecallPolicy { linear_scan_threshold: usize::MAX, ..base };
        let indexed = RecallPolicy {
            linear_scan_threshold: 0,
            min_staged_for_rebuild: usize::MAX,
            ..base
        };

        let ids = |policy| {
            ResonanceRecall::with_policy(&store, policy)
                .recall(probe, threshold, top_k, None)
                .into_iter()
                .map(|r| r.star.id)
                .collect::<Vec<_>>()
        };
        prop_assert_eq!(ids(linear), ids(indexed));
    }

    #[test]
    fn constellations_ignore_input_order(
        points in prop::collection::vec((point(), 0.0f64..=1.0), 1..40),
        distance in 0.0f64..1.5,
        seed in any::<u64>(),
    ) {
        let stars: Vec<Arc<Star>> = points
            .iter()
            .enumerate()
            .map(|(i, (coordinates, gravity))| {
                Arc::new(Star {
                    id: StarId(i as u64),
                    code: code(),
                    coordinates: *coordinates,
                    brightness: 0.5,
                    gravity: *gravity,
                    tags: Default::default(),
                    created_at: i as u64,
                })
            })
            .collect();

        let mut shuffled = stars.clone();
        // Deterministic rotation stands in for a shuffle
        let len = shuffled.len();
        shuffled.rotate_left((seed as usize) % len);
        shuffled.reverse();

        let tones = default_tones();
        let former = ConstellationFormer::new(&tones);
        let a = former.form(&stars, distance);
        let b = former.form(&shuffled, distance);
        prop_assert_eq!(&a, &b);

        let members: usize = a.iter().map(|c| c.members.len()).sum();
        prop_assert_eq!(members, stars.len());
    }
}
