//! Starmap associative memory engine.
//!
//! Experience signatures are encoded as unit 4-vectors with energy,
//! frequency and phase, compressed into 12-byte rainbow codes, and scattered
//! as stars across a bounded 4-D field. Recall scores stars by resonance
//! (brightness and gravity discounted by distance) through a linear scan or
//! a staged k-d tree; constellations group nearby stars into proximity
//! graphs labeled by shape and tone.
//!
//! Zero I/O. Persistence lives in `sm-store`.

pub mod config;
pub mod constants;
pub mod constellation;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod index;
pub mod orientation;
pub mod recall;
pub mod record;
pub mod spectrum;
pub mod star;
pub mod store;
pub mod time;
pub mod wave;

pub use config::{EngineConfig, ToneCenter, default_tones};
pub use constants::{CODE_LEN, EPSILON, ROUND_TRIP_BOUND};
pub use constellation::{Constellation, ConstellationFormer, Pattern};
pub use encoder::{Encoder, FeatureSource, Features};
pub use engine::{MemoryEngine, RecallHit, RecallOutcome};
pub use error::{CoreError, Result};
pub use index::{BoundingBox, IndexedPoint, KdTree};
pub use orientation::Orientation;
pub use recall::{
    Query, RecallPolicy, RecallReport, RecallStrategy, Resonance, ResonanceRecall, resonance,
    score_batch, score_batch_par,
};
pub use record::{StarRecord, decode_file, encode_file};
pub use spectrum::{RainbowCode, Spectrum, SpectrumCompressor, SpectrumSummary};
pub use star::{Star, StarId};
pub use store::{IndexSnapshot, MemoryStore, StoreStats};
pub use wave::{WavePattern, merge_waves};
