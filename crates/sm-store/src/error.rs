use std::fmt;
use std::path::PathBuf;

use sm_core::CoreError;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    /// A persisted record or file failed to decode. Terminal for the load.
    Corrupt(CoreError),
    InvalidData(String),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Config(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "SQLite error: {e}"),
            StoreError::Corrupt(e) => write!(f, "corrupt store: {e}"),
            StoreError::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            StoreError::Io { path, source } => write!(f, "{}: {source}", path.display()),
            StoreError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Sqlite(e) => Some(e),
            StoreError::Corrupt(e) => Some(e),
            StoreError::Io { source, .. } => Some(source),
            StoreError::InvalidData(_) | StoreError::Config(_) => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<CoreError> for StoreError {
    fn from(e: CoreError) -> Self {
        StoreError::Corrupt(e)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
