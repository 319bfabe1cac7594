//! The `TagService` capability set and its local implementation.

use async_trait::async_trait;
use std::sync::Arc;

use ferrocache_storage::StorageDriver;

use crate::digest::{Descriptor, Digest};
use crate::error::CoreError;

/// Mutable name-to-digest mappings, scoped to one repository.
#[async_trait]
pub trait TagService: Send + Sync {
    async fn get(&self, tag: &str) -> Result<Descriptor, CoreError>;
    async fn all(&self) -> Result<Vec<String>, CoreError>;
    async fn tag(&self, tag: &str, descriptor: &Descriptor) -> Result<(), CoreError>;
    async fn untag(&self, tag: &str) -> Result<(), CoreError>;
    async fn lookup(&self, digest: &Digest) -> Result<Vec<String>, CoreError>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoredTag {
    digest: String,
    size: i64,
    media_type: String,
}

/// Tags live one JSON file per tag under `/tags/<repository>/<tag>.json`.
/// The repository name is baked into this store at construction, just
/// as every other local store is scoped to a single repository by its
/// caller.
pub struct LocalTagService {
    driver: Arc<dyn StorageDriver>,
    repository: String,
}

impl LocalTagService {
    pub fn new(driver: Arc<dyn StorageDriver>, repository: impl Into<String>) -> Self {
        Self {
            driver,
            repository: repository.into(),
        }
    }

    fn tag_path(&self, tag: &str) -> String {
        format!("/tags/{}/{}.json", self.repository, tag)
    }

    fn tags_dir(&self) -> String {
        format!("/tags/{}", self.repository)
    }
}

#[async_trait]
impl TagService for LocalTagService {
    async fn get(&self, tag: &str) -> Result<Descriptor, CoreError> {
        match self.driver.get_content(&self.tag_path(tag)).await {
            Ok(bytes) => {
                let stored: StoredTag = serde_json::from_slice(&bytes)
                    .map_err(|e| CoreError::StateCorrupt(e.to_string()))?;
                Ok(Descriptor {
                    digest: stored.digest.parse()?,
                    size: stored.size,
                    media_type: stored.media_type,
                })
            }
            Err(e) if e.is_not_found() => Err(CoreError::TagUnknown(tag.to_string())),
            Err(e) => Err(CoreError::Storage(e)),
        }
    }

    async fn all(&self) -> Result<Vec<String>, CoreError> {
        match self.driver.list(&self.tags_dir()).await {
            Ok(entries) => Ok(entries
                .into_iter()
                .filter_map(|name| name.strip_suffix(".json").map(str::to_string))
                .collect()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(CoreError::Storage(e)),
        }
    }

    async fn tag(&self, tag: &str, descriptor: &Descriptor) -> Result<(), CoreError> {
        let stored = StoredTag {
            digest: descriptor.digest.to_string(),
            size: descriptor.size,
            media_type: descriptor.media_type.clone(),
        };
        let bytes = bytes::Bytes::from(serde_json::to_vec(&stored).expect("tag serializes"));
        self.driver.put_content(&self.tag_path(tag), bytes).await?;
        Ok(())
    }

    async fn untag(&self, tag: &str) -> Result<(), CoreError> {
        match self.driver.delete(&self.tag_path(tag)).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Err(CoreError::TagUnknown(tag.to_string())),
            Err(e) => Err(CoreError::Storage(e)),
        }
    }

    async fn lookup(&self, digest: &Digest) -> Result<Vec<String>, CoreError> {
        let mut matches = Vec::new();
        for tag in self.all().await? {
            if let Ok(descriptor) = self.get(&tag).await {
                if &descriptor.digest == digest {
                    matches.push(tag);
                }
            }
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrocache_storage::MemoryDriver;

    fn store() -> LocalTagService {
        LocalTagService::new(Arc::new(MemoryDriver::new()), "library/nginx")
    }

    fn descriptor() -> Descriptor {
        Descriptor {
            digest: Digest::sha256(b"manifest bytes"),
            size: 42,
            media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
        }
    }

    #[tokio::test]
    async fn tag_then_get_round_trips() {
        let s = store();
        let d = descriptor();
        s.tag("latest", &d).await.unwrap();
        let got = s.get("latest").await.unwrap();
        assert_eq!(got, d);
    }

    #[tokio::test]
    async fn get_unknown_tag_fails() {
        let s = store();
        assert!(matches!(s.get("missing").await.unwrap_err(), CoreError::TagUnknown(_)));
    }

    #[tokio::test]
    async fn all_lists_every_tag() {
        let s = store();
        let d = descriptor();
        s.tag("latest", &d).await.unwrap();
        s.tag("v1", &d).await.unwrap();
        let mut all = s.all().await.unwrap();
        all.sort();
        assert_eq!(all, vec!["latest".to_string(), "v1".to_string()]);
    }

    #[tokio::test]
    async fn untag_removes_mapping() {
        let s = store();
        s.tag("latest", &descriptor()).await.unwrap();
        s.untag("latest").await.unwrap();
        assert!(matches!(s.get("latest").await.unwrap_err(), CoreError::TagUnknown(_)));
    }

    #[tokio::test]
    async fn lookup_finds_every_tag_pointing_at_a_digest() {
        let s = store();
        let d = descriptor();
        s.tag("latest", &d).await.unwrap();
        s.tag("stable", &d).await.unwrap();
        let mut tags = s.lookup(&d.digest).await.unwrap();
        tags.sort();
        assert_eq!(tags, vec!["latest".to_string(), "stable".to_string()]);
    }
}
