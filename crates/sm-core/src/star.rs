use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::spectrum::RainbowCode;

/// Stable, store-assigned star identifier. Sequential from 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StarId(pub u64);

impl fmt::Display for StarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored memory: compact code, position in the 4-D field, importance
/// weights and tags. Immutable once scattered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Star {
    pub id: StarId,
    pub code: RainbowCode,
    /// Each component in [-1, 1].
    pub coordinates: [f64; 4],
    /// In [0, 1].
    pub brightness: f64,
    /// In [0, 1].
    pub gravity: f64,
    pub tags: BTreeSet<String>,
    /// Unix microseconds.
    pub created_at: u64,
}

impl Star {
    /// Peak score this star can reach (at distance 0).
    pub fn weight(&self) -> f64 {
        self.brightness * (1.0 + self.gravity)
    }

    pub fn distance_to(&self, point: &[f64; 4]) -> f64 {
        euclidean(&self.coordinates, point)
    }
}

/// Clamp a weight into [0, 1]; non-finite becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Clamp each coordinate into [-1, 1]; non-finite components become 0.
pub fn clamp_coordinates(coordinates: [f64; 4]) -> [f64; 4] {
    coordinates.map(|c| if c.is_finite() { c.clamp(-1.0, 1.0) } else { 0.0 })
}

pub fn squared_distance(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    a.iter().zip(b).map(|(p, q)| (p - q) * (p - q)).sum()
}

pub fn euclidean(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    squared_distance(a, b).sqrt()
}
