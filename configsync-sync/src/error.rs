//! Error types for configsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use configsync_store::StoreError;

/// All errors that can arise from reconciliation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The stored path cannot be materialized under the local root.
    #[error("path rejected: {path}: {reason}")]
    PathRejected { path: String, reason: &'static str },

    /// A stored record is not a valid entry document.
    #[error("record {id} could not be decoded: {source}")]
    Decode {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An error from the entry store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A page worker panicked or was cancelled.
    #[error("page worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    /// The pass observed its termination flag and stopped.
    #[error("pass terminated")]
    Terminated,
}

impl SyncError {
    pub fn is_terminated(&self) -> bool {
        matches!(self, SyncError::Terminated)
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
