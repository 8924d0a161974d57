//! Whitelist Store Error Types

use std::path::PathBuf;

/// Errors raised by whitelist store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backing file could not be read, written or renamed
    #[error("Whitelist store I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Backing file exists but does not hold a valid whitelist document
    #[error("Whitelist state at {path:?} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Caller-supplied state breaks a whitelist invariant; nothing was written
    #[error("Refusing to save invalid whitelist: {reason}")]
    Invalid { reason: String },

    /// In-memory state could not be serialized
    #[error("Failed to encode whitelist state: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        StoreError::Invalid {
            reason: reason.into(),
        }
    }

    /// Whether this error means the persisted content needs operator repair
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt { .. })
    }
}
