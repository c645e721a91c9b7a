//! Error types for configsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from parsing domain values or loading settings.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A file path that normalizes to nothing usable.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// A duration string such as `30s` or `-1` that could not be parsed.
    #[error("invalid interval '{value}': {reason}")]
    InvalidInterval { value: String, reason: String },

    #[error("invalid health status '{0}'; expected green, yellow or red")]
    InvalidHealthStatus(String),

    /// Underlying I/O failure while reading or writing settings.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// An explicitly requested settings file does not exist.
    #[error("settings not found at {path}")]
    SettingsNotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
