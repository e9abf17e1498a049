//! Feature tuple → wave pattern.
//!
//! The semantic collaborator that produces features lives outside this
//! crate; all the encoder needs is the narrow [`FeatureSource`] contract.

use serde::{Deserialize, Serialize};

use crate::constants::EPSILON;
use crate::orientation::Orientation;
use crate::wave::WavePattern;

/// Frequency used when the source offers no hint.
pub const DEFAULT_FREQUENCY: f64 = 0.5;

/// Anything that can describe an experience as four raw scalars plus
/// optional frequency and phase hints.
pub trait FeatureSource {
    /// Raw components mapped onto (w, x, y, z). Any scale.
    fn components(&self) -> [f64; 4];

    fn frequency_hint(&self) -> Option<f64> {
        None
    }

    fn phase_hint(&self) -> Option<f64> {
        None
    }
}

/// Plain feature record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub components: [f64; 4],
    #[serde(default)]
    pub frequency: Option<f64>,
    #[serde(default)]
    pub phase: Option<f64>,
}

impl Features {
    pub fn new(components: [f64; 4]) -> Self {
        Self {
            components,
            frequency: None,
            phase: None,
        }
    }

    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.frequency = Some(frequency);
        self
    }

    pub fn with_phase(mut self, phase: f64) -> Self {
        self.phase = Some(phase);
        self
    }
}

impl FeatureSource for Features {
    fn components(&self) -> [f64; 4] {
        self.components
    }

    fn frequency_hint(&self) -> Option<f64> {
        self.frequency
    }

    fn phase_hint(&self) -> Option<f64> {
        self.phase
    }
}

impl FeatureSource for [f64; 4] {
    fn components(&self) -> [f64; 4] {
        *self
    }
}

/// Stateless encoder.
pub struct Encoder;

impl Encoder {
    /// Encode a feature source into a wave pattern.
    ///
    /// Energy is the magnitude of the raw components. Degenerate input
    /// (all-zero, near-zero or non-finite components) is recovered by
    /// substituting the canonical orientation with zero energy.
    pub fn encode(features: &impl FeatureSource) -> WavePattern {
        let [w, x, y, z] = features.components();
        let raw = Orientation { w, x, y, z };
        let magnitude = raw.magnitude();

        let (orientation, energy) = if magnitude.is_finite() && magnitude >= EPSILON {
            (raw.normalize(), magnitude)
        } else {
            tracing::debug!(
                ?raw,
                "degenerate feature components, substituting canonical orientation"
            );
            (Orientation::canonical(), 0.0)
        };

        let frequency = features
            .frequency_hint()
            .filter(|f| f.is_finite())
            .unwrap_or(DEFAULT_FREQUENCY);
        let phase = features.phase_hint().unwrap_or(0.0);

        WavePattern::new(orientation, energy, frequency, phase)
    }
}
