//! The [`StorageDriver`] trait: a polymorphic, path-addressed content store.
//!
//! Every higher layer in this crate family — blob stores, manifest
//! stores, eviction controllers — is written against this trait alone.
//! Concrete dispatch (which backend is actually in use) happens once,
//! at process startup, when a `Arc<dyn StorageDriver>` is constructed.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::error::StorageError;

/// Metadata about a single path in the driver's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: DateTime<Utc>,
}

/// What [`StorageDriver::walk`] should do after visiting an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    /// Keep descending into subsequent entries.
    Continue,
    /// Prune the subtree rooted at the just-visited directory.
    SkipDir,
}

/// A boxed, owned byte reader. Dropping it releases any underlying
/// resources (file handles, in-flight ranges) — Rust's RAII stands in
/// for the source's explicit `Close()`.
pub type ContentReader = Pin<Box<dyn AsyncRead + Send>>;

/// A stateful, append-oriented writer for a single path.
///
/// `commit` and `cancel` are mutually exclusive and each idempotent in
/// the sense that a second call after the first returns an error
/// rather than re-running the side effect.
#[async_trait]
pub trait FileWriter: Send {
    /// Append bytes to the writer's buffer.
    async fn write(&mut self, buf: &[u8]) -> Result<usize, StorageError>;

    /// Bytes written so far (including any content preserved by `append=true`).
    fn size(&self) -> u64;

    /// Discard everything written and remove the path.
    async fn cancel(&mut self) -> Result<(), StorageError>;

    /// Seal the writer; the path now holds everything written.
    async fn commit(&mut self) -> Result<(), StorageError>;

    /// Release any resources held by the writer without altering content.
    async fn close(&mut self) -> Result<(), StorageError>;
}

/// A content-addressed, hierarchical filesystem abstraction.
///
/// Paths are `/`-rooted; directories are implicit and exist iff some
/// descendant file exists. Implementations must be safe for concurrent
/// calls from many tasks.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Read an entire file into memory.
    async fn get_content(&self, path: &str) -> Result<Bytes, StorageError>;

    /// Write an entire file, truncating any prior content.
    async fn put_content(&self, path: &str, content: Bytes) -> Result<(), StorageError>;

    /// Open a reader for `path` starting at `offset`.
    ///
    /// `offset == size` is valid and yields an immediately-EOF reader;
    /// a negative offset or one beyond the file's size is
    /// [`StorageError::InvalidOffset`].
    async fn reader(&self, path: &str, offset: u64) -> Result<ContentReader, StorageError>;

    /// Open a writer for `path`. `append=false` truncates prior content
    /// (visible only once `commit` is called); `append=true` preserves
    /// and extends it.
    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>, StorageError>;

    /// Stat a single path (file or directory).
    async fn stat(&self, path: &str) -> Result<FileInfo, StorageError>;

    /// List the immediate children of a directory path.
    async fn list(&self, path: &str) -> Result<Vec<String>, StorageError>;

    /// Move (rename) a path, overwriting a destination file if present.
    async fn mv(&self, source: &str, dest: &str) -> Result<(), StorageError>;

    /// Delete a path (file or directory, recursively).
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Visit every file transitively under `path`, in unspecified order.
    async fn walk(
        &self,
        path: &str,
        visitor: &mut (dyn for<'a> FnMut(&'a FileInfo) -> WalkAction + Send),
    ) -> Result<(), StorageError>;

    /// Sum of sizes of every file transitively under `path`.
    async fn usage(&self, path: &str) -> Result<u64, StorageError>;

    /// A URL clients could fetch `path` from directly, bypassing the
    /// driver, if the backend supports redirects (e.g. a signed S3 URL).
    fn redirect_url(&self, _path: &str) -> Option<String> {
        None
    }
}

/// Validate that a path is `/`-rooted and contains no `.`/`..` segments.
pub fn validate_path(path: &str) -> Result<(), StorageError> {
    if !path.starts_with('/') {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    for segment in path.split('/') {
        if segment == "." || segment == ".." {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
    }
    Ok(())
}
