//! Storage driver error types

use thiserror::Error;

/// Errors raised by a [`crate::StorageDriver`] implementation.
///
/// These map onto the driver-level failure kinds every caller of the
/// driver is expected to handle: a missing path is not a bug, an
/// out-of-range reader offset is a caller error, and an operation a
/// particular backend never implemented is reported rather than
/// silently ignored.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("invalid offset {offset} for path {path}")]
    InvalidOffset { path: String, offset: i64 },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("operation not supported by this driver: {0}")]
    Unsupported(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True for errors that higher layers should treat as "content absent"
    /// rather than propagate as a hard failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::PathNotFound(_))
    }
}
