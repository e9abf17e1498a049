//! Wave pattern ⇄ rainbow code.
//!
//! A wave is projected onto seven channels spaced evenly around the circle
//! (channel `i` sits at angle `θᵢ = 2πi/7`). Each channel is a fixed affine
//! combination of the sign-canonical orientation:
//!
//! ```text
//! cᵢ = μ + w + κ·g(E)·(x cos θᵢ + y sin θᵢ) + λ·z cos 2θᵢ
//! ```
//!
//! with `μ = 2`, `κ = λ = 1` and the energy gain `g(E) = ½ + ½·E/(1+E)`.
//! `μ` keeps every channel non-negative, so `|cᵢ| = cᵢ`.
//!
//! The seven channels collapse into three summary scalars:
//!
//! | scalar    | reduction                                   | carries    |
//! |-----------|---------------------------------------------|------------|
//! | amplitude | mean of `|cᵢ|`                              | `w`        |
//! | phase     | circular mean of `θᵢ` weighted by `|cᵢ|`    | `atan2(y, x)` |
//! | frequency | mean of channel frequencies `Fᵢ` weighted by `|cᵢ|` | `z` |
//!
//! Over seven equally spaced angles the harmonics `1, cos θ, sin θ, cos 2θ`
//! are mutually orthogonal, and the frequency table `Fᵢ = ½ + 0.4 cos 2θᵢ`
//! is orthogonal to the dipole, so each scalar isolates one term. The
//! dipole's magnitude (and with it the energy gain) is the part the summary
//! discards: reconstructions come back with unit energy.
//!
//! Decompression rebuilds the harmonic spectrum those three scalars
//! describe, then inverts the channel projection by least squares. Because
//! the design columns are orthogonal the normal equations are diagonal.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::constants::{CHANNEL_COUNT, CODE_LEN};
use crate::error::{CoreError, Result};
use crate::orientation::Orientation;
use crate::wave::{WavePattern, wrap_phase};

/// Channel floor `μ`; at least `κ + λ` so channels never go negative.
const BASE_LEVEL: f64 = 2.0;
/// Dipole weight `κ`.
const DIPOLE_GAIN: f64 = 1.0;
/// Quadrupole weight `λ`.
const QUADRUPOLE_GAIN: f64 = 1.0;
const FREQUENCY_CENTER: f64 = 0.5;
const FREQUENCY_SPREAD: f64 = 0.4;

/// Energy assigned to every decompressed wave.
pub const RECONSTRUCTED_ENERGY: f64 = 1.0;

/// Angle of channel `i` on the unit circle.
fn channel_angle(i: usize) -> f64 {
    TAU * i as f64 / CHANNEL_COUNT as f64
}

/// Fixed per-channel frequency table, all within [0.1, 0.9].
pub fn channel_frequencies() -> [f64; CHANNEL_COUNT] {
    std::array::from_fn(|i| FREQUENCY_CENTER + FREQUENCY_SPREAD * (2.0 * channel_angle(i)).cos())
}

/// Saturating dipole gain in [0.5, 1).
fn energy_gain(energy: f64) -> f64 {
    let e = if energy.is_finite() { energy.max(0.0) } else { 0.0 };
    0.5 + 0.5 * e / (1.0 + e)
}

/// Transient 7-channel projection of a wave. Never persisted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spectrum(pub [f64; CHANNEL_COUNT]);

impl Spectrum {
    /// Project a wave onto the seven channels.
    pub fn project(wave: &WavePattern) -> Self {
        let q = wave.orientation.canonical_sign();
        let dipole = DIPOLE_GAIN * energy_gain(wave.energy);
        Self(std::array::from_fn(|i| {
            let theta = channel_angle(i);
            BASE_LEVEL
                + q.w
                + dipole * (q.x * theta.cos() + q.y * theta.sin())
                + QUADRUPOLE_GAIN * q.z * (2.0 * theta).cos()
        }))
    }

    /// Reduce to the three summary scalars.
    pub fn summarize(&self) -> SpectrumSummary {
        let frequencies = channel_frequencies();
        let mut total = 0.0;
        let (mut sin_acc, mut cos_acc) = (0.0, 0.0);
        let mut freq_acc = 0.0;

        for (i, c) in self.0.iter().enumerate() {
            let weight = c.abs();
            let theta = channel_angle(i);
            total += weight;
            sin_acc += weight * theta.sin();
            cos_acc += weight * theta.cos();
            freq_acc += weight * frequencies[i];
        }

        let amplitude = total / CHANNEL_COUNT as f64;
        let phase = wrap_phase(sin_acc.atan2(cos_acc));
        let frequency = if total > 0.0 {
            freq_acc / total
        } else {
            FREQUENCY_CENTER
        };

        SpectrumSummary {
            amplitude,
            phase,
            frequency,
        }
    }

    /// Rebuild the harmonic spectrum described by a summary.
    ///
    /// The kernel is centered at `phase`, its level comes from `amplitude`
    /// and its quadrupole weight from how far `frequency` sits from the
    /// table center. The dipole radius is whatever keeps the implied
    /// orientation on the unit sphere.
    pub fn reconstruct(summary: &SpectrumSummary) -> Self {
        let w = (summary.amplitude - BASE_LEVEL).clamp(0.0, 1.0);
        let z = (2.0 * summary.amplitude * (summary.frequency - FREQUENCY_CENTER)
            / (FREQUENCY_SPREAD * QUADRUPOLE_GAIN))
            .clamp(-1.0, 1.0);
        let radius = (1.0 - w * w - z * z).max(0.0).sqrt();

        Self(std::array::from_fn(|i| {
            let theta = channel_angle(i);
            summary.amplitude
                + DIPOLE_GAIN * radius * (theta - summary.phase).cos()
                + QUADRUPOLE_GAIN * z * (2.0 * theta).cos()
        }))
    }

    /// Least-squares inverse of [`Spectrum::project`] at unit energy gain,
    /// renormalized.
    pub fn invert(&self) -> Orientation {
        let n = CHANNEL_COUNT as f64;
        // Squared norm of each harmonic column over the channel circle
        let harmonic_norm = n / 2.0;

        let mut mean = 0.0;
        let (mut cos_acc, mut sin_acc, mut quad_acc) = (0.0, 0.0, 0.0);
        for (i, c) in self.0.iter().enumerate() {
            let theta = channel_angle(i);
            mean += c;
            cos_acc += c * theta.cos();
            sin_acc += c * theta.sin();
            quad_acc += c * (2.0 * theta).cos();
        }
        mean /= n;

        Orientation::new(
            mean - BASE_LEVEL,
            cos_acc / (DIPOLE_GAIN * harmonic_norm),
            sin_acc / (DIPOLE_GAIN * harmonic_norm),
            quad_acc / (QUADRUPOLE_GAIN * harmonic_norm),
        )
    }
}

/// The three scalars a rainbow code carries.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectrumSummary {
    pub amplitude: f64,
    pub phase: f64,
    pub frequency: f64,
}

/// Fixed-size compressed summary: amplitude, phase, frequency as
/// little-endian f32.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RainbowCode {
    bytes: [u8; CODE_LEN],
}

impl RainbowCode {
    /// Pack a summary. Precision drops to f32.
    pub fn pack(summary: &SpectrumSummary) -> Self {
        let mut bytes = [0u8; CODE_LEN];
        bytes[0..4].copy_from_slice(&(summary.amplitude as f32).to_le_bytes());
        bytes[4..8].copy_from_slice(&(summary.phase as f32).to_le_bytes());
        bytes[8..12].copy_from_slice(&(summary.frequency as f32).to_le_bytes());
        Self { bytes }
    }

    /// Wrap raw bytes without interpreting them. Validation happens on
    /// [`RainbowCode::unpack`], so corrupt codes can still be stored and
    /// skipped later.
    pub fn from_bytes(bytes: [u8; CODE_LEN]) -> Self {
        Self { bytes }
    }

    /// Wrap a slice, failing if it is not exactly [`CODE_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; CODE_LEN] = bytes.try_into().map_err(|_| {
            CoreError::MalformedCode(format!(
                "expected {CODE_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; CODE_LEN] {
        &self.bytes
    }

    /// Decode the packed scalars, rejecting values no compressor emits.
    pub fn unpack(&self) -> Result<SpectrumSummary> {
        let read = |at: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&self.bytes[at..at + 4]);
            f32::from_le_bytes(word) as f64
        };
        let summary = SpectrumSummary {
            amplitude: read(0),
            phase: read(4),
            frequency: read(8),
        };

        if !summary.amplitude.is_finite()
            || !summary.phase.is_finite()
            || !summary.frequency.is_finite()
        {
            return Err(CoreError::MalformedCode(format!(
                "non-finite scalar in {summary:?}"
            )));
        }
        if summary.amplitude < 0.0 {
            return Err(CoreError::MalformedCode(format!(
                "negative amplitude {}",
                summary.amplitude
            )));
        }
        if !(0.0..=1.0).contains(&summary.frequency) {
            return Err(CoreError::MalformedCode(format!(
                "frequency {} outside [0, 1]",
                summary.frequency
            )));
        }
        Ok(summary)
    }
}

/// Stateless compressor between wave patterns and rainbow codes.
pub struct SpectrumCompressor;

impl SpectrumCompressor {
    /// Project, summarize and pack.
    pub fn compress(wave: &WavePattern) -> RainbowCode {
        RainbowCode::pack(&Spectrum::project(wave).summarize())
    }

    /// Approximate inverse of [`SpectrumCompressor::compress`].
    ///
    /// Lossy and not idempotent: orientation is recovered to within
    /// [`crate::constants::ROUND_TRIP_BOUND`] (sign-invariant), energy is
    /// reset to [`RECONSTRUCTED_ENERGY`], frequency and phase become the
    /// code's own scalars.
    pub fn decompress(code: &RainbowCode) -> Result<WavePattern> {
        let summary = code.unpack()?;
        let orientation = Spectrum::reconstruct(&summary).invert();
        Ok(WavePattern::new(
            orientation,
            RECONSTRUCTED_ENERGY,
            summary.frequency,
            summary.phase,
        ))
    }

    /// Decompress from an untrusted byte slice.
    pub fn decompress_bytes(bytes: &[u8]) -> Result<WavePattern> {
        Self::decompress(&RainbowCode::from_slice(bytes)?)
    }

    /// `size_of::<WavePattern>() / size_of::<RainbowCode>()`.
    pub fn compression_ratio() -> f64 {
        std::mem::size_of::<WavePattern>() as f64 / std::mem::size_of::<RainbowCode>() as f64
    }
}
