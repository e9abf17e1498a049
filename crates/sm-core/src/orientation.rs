use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::EPSILON;

/// Unit 4-vector carrying the direction of an encoded experience.
///
/// Always normalized. `q` and `-q` describe the same orientation: the
/// angular distance handles this via abs(dot), and the spectrum compressor
/// canonicalizes to `w >= 0` before projecting.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Orientation {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PartialEq for Orientation {
    fn eq(&self, other: &Self) -> bool {
        (self.w - other.w).abs() < EPSILON
            && (self.x - other.x).abs() < EPSILON
            && (self.y - other.y).abs() < EPSILON
            && (self.z - other.z).abs() < EPSILON
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::canonical()
    }
}

impl Orientation {
    /// Create a new orientation, automatically normalized.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }.normalize()
    }

    /// Canonical orientation (1, 0, 0, 0), substituted for degenerate input.
    pub fn canonical() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    /// Euclidean length of the raw components.
    pub fn magnitude(self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Normalize to unit length. Returns canonical if near-zero or non-finite.
    pub fn normalize(self) -> Self {
        let norm = self.magnitude();
        if !norm.is_finite() || norm < EPSILON {
            return Self::canonical();
        }
        Self {
            w: self.w / norm,
            x: self.x / norm,
            y: self.y / norm,
            z: self.z / norm,
        }
    }

    /// 4D dot product.
    pub fn dot(self, other: Self) -> f64 {
        self.w * other.w + self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Geodesic distance on S³. Range: [0, π].
    /// Uses abs(dot) to handle antipodal equivalence.
    pub fn angular_distance(self, other: Self) -> f64 {
        let d = self.dot(other).abs().clamp(0.0, 1.0);
        2.0 * d.acos()
    }

    /// Flip into the `w >= 0` hemisphere. Same orientation, unique sign.
    pub fn canonical_sign(self) -> Self {
        if self.w < 0.0 { -self } else { self }
    }

    /// Weighted component average of several orientations, renormalized.
    ///
    /// Each item is sign-aligned with the first before averaging so that
    /// antipodal representatives reinforce rather than cancel. Non-positive
    /// weights are ignored; if nothing usable remains the result is canonical.
    pub fn blend(items: &[(Orientation, f64)]) -> Self {
        let Some(&(anchor, _)) = items.iter().find(|(_, weight)| *weight > 0.0) else {
            return Self::canonical();
        };

        let mut acc = Self {
            w: 0.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        };
        for &(q, weight) in items {
            if weight <= 0.0 || !weight.is_finite() {
                continue;
            }
            let aligned = if anchor.dot(q) < 0.0 { -q } else { q };
            acc.w += aligned.w * weight;
            acc.x += aligned.x * weight;
            acc.y += aligned.y * weight;
            acc.z += aligned.z * weight;
        }
        acc.normalize()
    }

    /// Uniform random orientation on S³ using Shoemake's method.
    pub fn random(rng: &mut impl Rng) -> Self {
        let s1: f64 = rng.random();
        let t1 = std::f64::consts::TAU * rng.random::<f64>();
        let t2 = std::f64::consts::TAU * rng.random::<f64>();

        let r1 = (1.0 - s1).sqrt();
        let r2 = s1.sqrt();

        Self {
            w: r1 * t1.sin(),
            x: r1 * t1.cos(),
            y: r2 * t2.sin(),
            z: r2 * t2.cos(),
        }
        .normalize()
    }

    /// Convert to [w, x, y, z] array.
    pub fn to_array(self) -> [f64; 4] {
        [self.w, self.x, self.y, self.z]
    }

    /// Create from [w, x, y, z] array (normalized).
    pub fn from_array(arr: [f64; 4]) -> Self {
        Self::new(arr[0], arr[1], arr[2], arr[3])
    }
}

impl std::ops::Neg for Orientation {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            w: -self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }
}
