/// Numerical epsilon for near-zero comparisons
pub const EPSILON: f64 = 1e-10;

/// Number of spectral channels a wave pattern is projected onto
pub const CHANNEL_COUNT: usize = 7;

/// Size of a packed rainbow code: three little-endian f32 scalars
pub const CODE_LEN: usize = 12;

/// Upper bound on the angular distance (radians, sign-invariant) between a
/// wave's orientation and its compress → decompress reconstruction.
pub const ROUND_TRIP_BOUND: f64 = 0.05;

/// Below this many stars recall always scans linearly.
pub const LINEAR_SCAN_THRESHOLD: usize = 100;

/// Rebuild once staging exceeds this fraction of the indexed set...
pub const REBUILD_RATIO: f64 = 0.25;

/// ...and holds at least this many stars.
pub const MIN_STAGED_FOR_REBUILD: usize = 16;

/// Maximum points held by a k-d tree leaf
pub const LEAF_SIZE: usize = 8;

/// Default edge length when forming constellations
pub const CONNECTION_DISTANCE: f64 = 0.5;

/// Version byte written at the head of every persisted star record
pub const RECORD_VERSION: u8 = 1;

/// Candidates scored between two deadline checks during recall
pub const DEADLINE_CHUNK: usize = 256;
