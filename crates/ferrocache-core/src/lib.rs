//! The pull-through caching core: a content-addressed local store, an
//! upstream pull-through path, and interchangeable eviction policies,
//! all written against the [`ferrocache_storage::StorageDriver`] seam.

pub mod blobstore;
pub mod config;
pub mod digest;
pub mod error;
pub mod eviction;
pub mod manifest;
pub mod proxy;
pub mod reference;
pub mod registry;
pub mod tag;
pub mod vacuum;

pub use digest::{Descriptor, Digest};
pub use error::CoreError;
pub use reference::CanonicalReference;
