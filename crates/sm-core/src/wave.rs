use serde::{Deserialize, Serialize};

use crate::orientation::Orientation;

/// One encoded experience signature: a unit orientation plus the scalar
/// energy, frequency and phase that travel with it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WavePattern {
    pub orientation: Orientation,
    /// Non-negative.
    pub energy: f64,
    /// Unitless, in [0, 1].
    pub frequency: f64,
    /// Radians, in [0, 2π).
    pub phase: f64,
}

impl WavePattern {
    /// Build a wave, enforcing every field invariant: the orientation is
    /// renormalized, energy floored at 0, frequency clamped to [0, 1] and
    /// phase wrapped into [0, 2π). Non-finite scalars fall back to 0
    /// (energy, phase) or 0.5 (frequency).
    pub fn new(orientation: Orientation, energy: f64, frequency: f64, phase: f64) -> Self {
        Self {
            orientation: orientation.normalize(),
            energy: if energy.is_finite() { energy.max(0.0) } else { 0.0 },
            frequency: if frequency.is_finite() {
                frequency.clamp(0.0, 1.0)
            } else {
                0.5
            },
            phase: wrap_phase(phase),
        }
    }

    /// Coordinates of this wave in the 4-D star field.
    pub fn coordinates(&self) -> [f64; 4] {
        self.orientation.to_array()
    }
}

/// Normalize an angle to [0, 2π). Non-finite input maps to 0.
pub fn wrap_phase(theta: f64) -> f64 {
    if !theta.is_finite() {
        return 0.0;
    }
    let wrapped = theta.rem_euclid(std::f64::consts::TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= std::f64::consts::TAU { 0.0 } else { wrapped }
}

/// Merge several waves into one, weighting each by its gravity.
///
/// Orientation is the gravity-weighted component average, renormalized.
/// Energy and frequency are gravity-weighted means; phase is the
/// gravity-weighted circular mean. Rotational (Hamilton product)
/// composition is intentionally not offered. With no positive weight the
/// waves are averaged uniformly.
pub fn merge_waves(items: &[(WavePattern, f64)]) -> Option<WavePattern> {
    if items.is_empty() {
        return None;
    }

    let total: f64 = items
        .iter()
        .map(|(_, g)| if g.is_finite() { g.max(0.0) } else { 0.0 })
        .sum();
    let weight_of = |g: f64| {
        if total > 0.0 {
            if g.is_finite() { g.max(0.0) / total } else { 0.0 }
        } else {
            1.0 / items.len() as f64
        }
    };

    let orientation = Orientation::blend(
        &items
            .iter()
            .map(|(wave, g)| (wave.orientation, weight_of(*g)))
            .collect::<Vec<_>>(),
    );

    let mut energy = 0.0;
    let mut frequency = 0.0;
    let (mut sin_acc, mut cos_acc) = (0.0, 0.0);
    for (wave, g) in items {
        let w = weight_of(*g);
        energy += wave.energy * w;
        frequency += wave.frequency * w;
        sin_acc += wave.phase.sin() * w;
        cos_acc += wave.phase.cos() * w;
    }

    Some(WavePattern::new(
        orientation,
        energy,
        frequency,
        sin_acc.atan2(cos_acc),
    ))
}
