//! Eviction controllers: interchangeable policies that decide when a
//! cached blob or manifest is reclaimed, and persist enough state to
//! survive a restart.

pub mod lru;
pub mod ttl;

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::CoreError;
use crate::reference::CanonicalReference;

/// What kind of artifact an eviction entry tracks. The LRU and TTL
/// controllers dispatch to a different expire callback per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EntryType {
    Blob,
    Manifest,
}

/// An expire callback: given the canonical reference that expired,
/// remove it from local storage. Registered once at controller
/// construction by the `ProxyingRegistry`.
pub type ExpireCallback =
    Arc<dyn Fn(CanonicalReference) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send>> + Send + Sync>;

/// The capability set `ProxyBlobStore` and `ProxyManifestStore` register
/// freshly-populated cache entries against. Both the TTL scheduler and
/// the LRU controller implement this; callers hold it as
/// `Arc<dyn EvictionController>` and never know which.
#[async_trait]
pub trait EvictionController: Send + Sync {
    /// Register a newly-cached artifact. If the underlying policy
    /// already tracks this key (e.g. the same blob referenced from a
    /// second repository), this refreshes recency/expiry rather than
    /// erroring — the TTL/LRU distinction between a fresh `Add` and a
    /// repeat `Touch` is handled internally.
    async fn register(&self, reference: &CanonicalReference, entry_type: EntryType) -> Result<(), CoreError>;

    /// Stop the controller's background mainloop, forcing a final
    /// state checkpoint first.
    async fn stop(&self);
}
