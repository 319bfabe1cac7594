//! `Vacuum`: the primitive that actually removes bytes from the
//! storage driver on behalf of an eviction controller.

use std::sync::Arc;

use ferrocache_storage::StorageDriver;

use crate::digest::Digest;
use crate::error::CoreError;

/// Deletes blobs and whole repositories. Callers (eviction expire
/// callbacks) decide *when*; this type only knows *how*.
pub struct Vacuum {
    driver: Arc<dyn StorageDriver>,
}

impl Vacuum {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        Self { driver }
    }

    /// Remove a blob's data and descriptor from local storage,
    /// regardless of which repositories referenced it.
    pub async fn remove_blob(&self, digest: &Digest) -> Result<(), CoreError> {
        let base = format!("/blobs/{}/{}/{}", digest.algorithm(), digest.shard(), digest.hex());
        match self.driver.delete(&base).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(CoreError::Storage(e)),
        }
    }

    /// Remove every tag and manifest reference a repository holds. The
    /// manifests and blobs those tags pointed to are not touched here —
    /// they are digest-keyed and may still be referenced elsewhere;
    /// the LRU controller's reference-counted entries own that decision.
    pub async fn remove_repository(&self, repository: &str) -> Result<(), CoreError> {
        let tags_dir = format!("/tags/{}", repository);
        match self.driver.delete(&tags_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(CoreError::Storage(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::{BlobStore, LocalBlobStore};
    use crate::tag::{LocalTagService, TagService};
    use ferrocache_storage::MemoryDriver;

    #[tokio::test]
    async fn remove_blob_deletes_data_and_descriptor() {
        let driver: Arc<dyn StorageDriver> = Arc::new(MemoryDriver::new());
        let blobs = LocalBlobStore::new(driver.clone());
        let descriptor = blobs.put("text/plain", bytes::Bytes::from_static(b"hi")).await.unwrap();

        let vacuum = Vacuum::new(driver.clone());
        vacuum.remove_blob(&descriptor.digest).await.unwrap();

        assert!(blobs.stat(&descriptor.digest).await.is_err());
    }

    #[tokio::test]
    async fn remove_blob_on_missing_digest_is_not_an_error() {
        let driver: Arc<dyn StorageDriver> = Arc::new(MemoryDriver::new());
        let vacuum = Vacuum::new(driver);
        let digest = Digest::sha256(b"never stored");
        assert!(vacuum.remove_blob(&digest).await.is_ok());
    }

    #[tokio::test]
    async fn remove_repository_clears_its_tags() {
        let driver: Arc<dyn StorageDriver> = Arc::new(MemoryDriver::new());
        let tags = LocalTagService::new(driver.clone(), "library/nginx");
        let descriptor = crate::digest::Descriptor {
            digest: Digest::sha256(b"m"),
            size: 1,
            media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
        };
        tags.tag("latest", &descriptor).await.unwrap();

        let vacuum = Vacuum::new(driver);
        vacuum.remove_repository("library/nginx").await.unwrap();

        assert!(tags.all().await.unwrap().is_empty());
    }
}
