//! Core error taxonomy.
//!
//! Mirrors the failure kinds every layer above the storage driver is
//! expected to recognize and handle by name rather than by string
//! matching.

use thiserror::Error;

use crate::digest::Digest;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("blob unknown: {0}")]
    BlobUnknown(Digest),

    #[error("manifest unknown: {0}")]
    ManifestUnknown(Digest),

    #[error("tag unknown: {0}")]
    TagUnknown(String),

    #[error("storage error: {0}")]
    Storage(#[from] ferrocache_storage::StorageError),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("eviction inconsistency: {0}")]
    Inconsistency(String),

    #[error("eviction state corrupted: {0}")]
    StateCorrupt(String),
}

impl CoreError {
    /// True for the "content absent in this store" family, which the
    /// proxy path is expected to swallow and fall back on rather than
    /// propagate.
    pub fn is_unknown(&self) -> bool {
        matches!(
            self,
            CoreError::BlobUnknown(_) | CoreError::ManifestUnknown(_) | CoreError::TagUnknown(_)
        ) || matches!(self, CoreError::Storage(e) if e.is_not_found())
    }
}
