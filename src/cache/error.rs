//! Cache storage errors.

use std::path::PathBuf;
use thiserror::Error;

/// Storage-layer failure. Distinct from a miss: a `get` that fails returns `Err`, a `get` that
/// finds nothing returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error during {operation} at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt cache entry {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize cache entry {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

impl CacheError {
    pub(crate) fn io(
        path: impl Into<PathBuf>,
        operation: &'static str,
        source: std::io::Error,
    ) -> Self {
        CacheError::Io {
            path: path.into(),
            operation,
            source,
        }
    }
}
