//! Error types for configsync-store.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use configsync_core::CoreError;

/// All errors that can arise from backend and entry store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend cannot be reached or refuses work.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("collection already exists: {0}")]
    CollectionExists(String),

    /// The scan cursor timed out or was never opened.
    #[error("scan cursor expired or unknown: {0}")]
    CursorExpired(String),

    /// Document ids must be URL-safe base64 characters.
    #[error("invalid document id: {0:?}")]
    InvalidId(String),

    /// A stored document could not be decoded into an entry.
    #[error("document {id} could not be decoded: {source}")]
    Decode {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl StoreError {
    /// `true` for failures that mean "try again later" rather than "bad input".
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Io { .. } | StoreError::Timeout { .. }
        )
    }
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
