use std::fmt;

/// Errors surfaced by the core engine.
///
/// Degenerate encoder input and a stale spatial index are recovered
/// internally and never appear here. `MalformedCode` is per-item: batch
/// operations skip the offending star and continue. `CorruptRecord` is
/// terminal for whatever load produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    MalformedCode(String),
    CorruptRecord(String),
    UnknownStar(u64),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::MalformedCode(msg) => write!(f, "malformed rainbow code: {msg}"),
            CoreError::CorruptRecord(msg) => write!(f, "corrupt star record: {msg}"),
            CoreError::UnknownStar(id) => write!(f, "unknown star id: {id}"),
        }
    }
}

impl std::error::Error for CoreError {}

pub type Result<T> = std::result::Result<T, CoreError>;
