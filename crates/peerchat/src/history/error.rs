//! History store error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for history store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while persisting history.
///
/// [`super::HistoryStore::load`] never fails: an absent or unparsable file is
/// reported as "no history". Only `append` refuses to build on a file it
/// cannot read.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error.
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Existing history file could not be read or decoded.
    #[error("refusing to overwrite unreadable history at {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },

    /// History could not be encoded.
    #[error("failed to encode history: {0}")]
    Encode(#[from] serde_json::Error),

    /// Store path has no file name or parent directory.
    #[error("invalid history path: {}", .0.display())]
    InvalidPath(PathBuf),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
