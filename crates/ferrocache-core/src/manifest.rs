//! The `ManifestService` capability set and its local implementation.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use ferrocache_storage::StorageDriver;

use crate::digest::{Descriptor, Digest};
use crate::error::CoreError;

/// A manifest (or index) document, addressed by its own digest.
#[async_trait]
pub trait ManifestService: Send + Sync {
    async fn exists(&self, digest: &Digest) -> Result<bool, CoreError>;
    async fn get(&self, digest: &Digest) -> Result<(Bytes, Descriptor), CoreError>;
    async fn put(&self, media_type: &str, content: Bytes) -> Result<Descriptor, CoreError>;
    async fn delete(&self, digest: &Digest) -> Result<(), CoreError>;
}

/// Manifests live under `/manifests/<algorithm>/<shard>/<hex>/{data,descriptor.json}`
/// — a layout separate from blobs so a repository's manifest set can be
/// walked independently during eviction bookkeeping.
pub struct LocalManifestStore {
    driver: Arc<dyn StorageDriver>,
}

impl LocalManifestStore {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        Self { driver }
    }

    fn data_path(digest: &Digest) -> String {
        format!(
            "/manifests/{}/{}/{}/data",
            digest.algorithm(),
            digest.shard(),
            digest.hex()
        )
    }

    fn descriptor_path(digest: &Digest) -> String {
        format!(
            "/manifests/{}/{}/{}/descriptor.json",
            digest.algorithm(),
            digest.shard(),
            digest.hex()
        )
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoredDescriptor {
    size: i64,
    media_type: String,
}

#[async_trait]
impl ManifestService for LocalManifestStore {
    async fn exists(&self, digest: &Digest) -> Result<bool, CoreError> {
        match self.driver.stat(&Self::data_path(digest)).await {
            Ok(info) => Ok(info.size > 0),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(CoreError::Storage(e)),
        }
    }

    async fn get(&self, digest: &Digest) -> Result<(Bytes, Descriptor), CoreError> {
        let content = match self.driver.get_content(&Self::data_path(digest)).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Err(CoreError::ManifestUnknown(digest.clone())),
            Err(e) => return Err(CoreError::Storage(e)),
        };
        let descriptor_bytes = match self.driver.get_content(&Self::descriptor_path(digest)).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Err(CoreError::ManifestUnknown(digest.clone())),
            Err(e) => return Err(CoreError::Storage(e)),
        };
        let stored: StoredDescriptor = serde_json::from_slice(&descriptor_bytes)
            .map_err(|e| CoreError::StateCorrupt(e.to_string()))?;
        Ok((
            content,
            Descriptor {
                digest: digest.clone(),
                size: stored.size,
                media_type: stored.media_type,
            },
        ))
    }

    async fn put(&self, media_type: &str, content: Bytes) -> Result<Descriptor, CoreError> {
        let digest = Digest::sha256(&content);
        let descriptor = Descriptor {
            digest: digest.clone(),
            size: content.len() as i64,
            media_type: media_type.to_string(),
        };
        self.driver.put_content(&Self::data_path(&digest), content).await?;
        let stored = StoredDescriptor {
            size: descriptor.size,
            media_type: descriptor.media_type.clone(),
        };
        let bytes = Bytes::from(serde_json::to_vec(&stored).expect("descriptor serializes"));
        self.driver.put_content(&Self::descriptor_path(&digest), bytes).await?;
        Ok(descriptor)
    }

    async fn delete(&self, digest: &Digest) -> Result<(), CoreError> {
        let data = self.driver.delete(&Self::data_path(digest)).await;
        let desc = self.driver.delete(&Self::descriptor_path(digest)).await;
        match (data, desc) {
            (Err(e), _) if !e.is_not_found() => Err(CoreError::Storage(e)),
            (_, Err(e)) if !e.is_not_found() => Err(CoreError::Storage(e)),
            (Err(_), Err(_)) => Err(CoreError::ManifestUnknown(digest.clone())),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrocache_storage::MemoryDriver;

    fn store() -> LocalManifestStore {
        LocalManifestStore::new(Arc::new(MemoryDriver::new()))
    }

    #[tokio::test]
    async fn put_exists_get_round_trip() {
        let s = store();
        let content = Bytes::from_static(br#"{"schemaVersion":2}"#);
        let descriptor = s.put("application/vnd.oci.image.manifest.v1+json", content.clone()).await.unwrap();

        assert!(s.exists(&descriptor.digest).await.unwrap());
        let (got, got_descriptor) = s.get(&descriptor.digest).await.unwrap();
        assert_eq!(got, content);
        assert_eq!(got_descriptor.media_type, "application/vnd.oci.image.manifest.v1+json");
    }

    #[tokio::test]
    async fn unknown_digest_is_manifest_unknown() {
        let s = store();
        let digest = Digest::sha256(b"nothing here");
        assert!(!s.exists(&digest).await.unwrap());
        assert!(matches!(s.get(&digest).await.unwrap_err(), CoreError::ManifestUnknown(_)));
    }

    #[tokio::test]
    async fn delete_then_exists_is_false() {
        let s = store();
        let descriptor = s.put("application/vnd.oci.image.manifest.v1+json", Bytes::from_static(b"{}")).await.unwrap();
        s.delete(&descriptor.digest).await.unwrap();
        assert!(!s.exists(&descriptor.digest).await.unwrap());
    }
}
