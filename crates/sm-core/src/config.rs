use serde::{Deserialize, Serialize};

use crate::constants::{
    CONNECTION_DISTANCE, LEAF_SIZE, LINEAR_SCAN_THRESHOLD, MIN_STAGED_FOR_REBUILD, REBUILD_RATIO,
};

/// A labeled reference point used to name a constellation's tone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToneCenter {
    pub label: String,
    pub center: [f64; 4],
}

impl ToneCenter {
    pub fn new(label: &str, center: [f64; 4]) -> Self {
        Self {
            label: label.to_string(),
            center,
        }
    }
}

/// Built-in tone references, used when no configuration supplies any.
pub fn default_tones() -> Vec<ToneCenter> {
    vec![
        ToneCenter::new("joyful", [0.7, 0.7, 0.0, 0.0]),
        ToneCenter::new("serene", [0.7, 0.0, -0.5, 0.5]),
        ToneCenter::new("curious", [0.3, 0.2, 0.7, 0.6]),
        ToneCenter::new("tense", [-0.3, 0.6, 0.6, -0.3]),
        ToneCenter::new("melancholic", [-0.6, -0.4, -0.4, 0.2]),
    ]
}

/// Engine tuning. Every field has a default, so a partial TOML table is
/// enough to override one knob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stores smaller than this always recall by linear scan.
    pub linear_scan_threshold: usize,
    /// Staging may grow to this fraction of the indexed set before a rebuild.
    pub rebuild_ratio: f64,
    /// Never rebuild for fewer staged stars than this.
    pub min_staged_for_rebuild: usize,
    /// Maximum points per k-d tree leaf.
    pub leaf_size: usize,
    /// Edge length used when a caller does not pick one.
    pub default_connection_distance: f64,
    pub tones: Vec<ToneCenter>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            linear_scan_threshold: LINEAR_SCAN_THRESHOLD,
            rebuild_ratio: REBUILD_RATIO,
            min_staged_for_rebuild: MIN_STAGED_FOR_REBUILD,
            leaf_size: LEAF_SIZE,
            default_connection_distance: CONNECTION_DISTANCE,
            tones: default_tones(),
        }
    }
}
