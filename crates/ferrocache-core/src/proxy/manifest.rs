//! `ProxyManifestStore`: pull-through for manifests. Simpler than blobs
//! — manifests are small enough that `Get` always materializes the
//! full payload, no tee-streaming or inflight dedup involved.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;

use super::auth::AuthChallenger;
use super::metrics::ProxyMetrics;
use crate::digest::{Descriptor, Digest};
use crate::error::CoreError;
use crate::eviction::{EntryType, EvictionController};
use crate::manifest::ManifestService;
use crate::reference::CanonicalReference;

pub struct ProxyManifestStore {
    local: Arc<dyn ManifestService>,
    remote: Arc<dyn ManifestService>,
    scheduler: Option<Arc<dyn EvictionController>>,
    repository_name: String,
    auth: Arc<dyn AuthChallenger>,
    metrics: Arc<ProxyMetrics>,
}

impl ProxyManifestStore {
    pub fn new(
        local: Arc<dyn ManifestService>,
        remote: Arc<dyn ManifestService>,
        scheduler: Option<Arc<dyn EvictionController>>,
        repository_name: impl Into<String>,
        auth: Arc<dyn AuthChallenger>,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Self {
            local,
            remote,
            scheduler,
            repository_name: repository_name.into(),
            auth,
            metrics,
        }
    }

    async fn register(&self, digest: &Digest) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        let reference = CanonicalReference::new(self.repository_name.clone(), digest.clone());
        if let Err(e) = scheduler.register(&reference, EntryType::Manifest).await {
            warn!(digest = %digest, error = %e, "failed to register manifest with eviction controller");
        }
    }
}

#[async_trait]
impl ManifestService for ProxyManifestStore {
    async fn exists(&self, digest: &Digest) -> Result<bool, CoreError> {
        if self.local.exists(digest).await? {
            return Ok(true);
        }
        self.auth.try_establish().await?;
        self.remote.exists(digest).await
    }

    async fn get(&self, digest: &Digest) -> Result<(Bytes, Descriptor), CoreError> {
        match self.local.get(digest).await {
            Ok((content, descriptor)) => {
                self.metrics.manifests.record_hit(content.len() as u64);
                Ok((content, descriptor))
            }
            Err(e) if e.is_unknown() => {
                self.auth.try_establish().await?;
                let (content, descriptor) = self.remote.get(digest).await?;
                self.local.put(&descriptor.media_type, content.clone()).await?;
                self.metrics
                    .manifests
                    .record_miss(content.len() as u64, content.len() as u64);
                self.register(digest).await;
                Ok((content, descriptor))
            }
            Err(e) => Err(e),
        }
    }

    async fn put(&self, _media_type: &str, _content: Bytes) -> Result<Descriptor, CoreError> {
        Err(CoreError::Unsupported("Put"))
    }

    async fn delete(&self, _digest: &Digest) -> Result<(), CoreError> {
        Err(CoreError::Unsupported("Delete"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::LocalManifestStore;
    use ferrocache_storage::MemoryDriver;

    fn setup() -> (ProxyManifestStore, Arc<dyn ManifestService>, Arc<dyn ManifestService>) {
        let local: Arc<dyn ManifestService> = Arc::new(LocalManifestStore::new(Arc::new(MemoryDriver::new())));
        let remote: Arc<dyn ManifestService> = Arc::new(LocalManifestStore::new(Arc::new(MemoryDriver::new())));
        let proxy = ProxyManifestStore::new(
            local.clone(),
            remote.clone(),
            None,
            "library/nginx",
            Arc::new(super::super::auth::NoAuthChallenger),
            Arc::new(ProxyMetrics::default()),
        );
        (proxy, local, remote)
    }

    #[tokio::test]
    async fn get_on_local_hit_never_touches_remote() {
        let (proxy, local, _remote) = setup();
        let content = Bytes::from_static(br#"{"schemaVersion":2}"#);
        let descriptor = local.put("application/vnd.oci.image.manifest.v1+json", content.clone()).await.unwrap();

        let (got, _) = proxy.get(&descriptor.digest).await.unwrap();
        assert_eq!(got, content);
        assert_eq!(proxy.metrics.manifests.snapshot().hits, 1);
    }

    #[tokio::test]
    async fn get_on_miss_pulls_through_and_caches_locally() {
        let (proxy, local, remote) = setup();
        let content = Bytes::from_static(br#"{"schemaVersion":2,"from":"upstream"}"#);
        let descriptor = remote.put("application/vnd.oci.image.manifest.v1+json", content.clone()).await.unwrap();

        let (got, _) = proxy.get(&descriptor.digest).await.unwrap();
        assert_eq!(got, content);
        assert!(local.exists(&descriptor.digest).await.unwrap());
        assert_eq!(proxy.metrics.manifests.snapshot().misses, 1);
    }

    #[tokio::test]
    async fn put_and_delete_are_unsupported() {
        let (proxy, _local, _remote) = setup();
        assert!(matches!(
            proxy.put("application/json", Bytes::new()).await.unwrap_err(),
            CoreError::Unsupported(_)
        ));
        assert!(matches!(
            proxy.delete(&Digest::sha256(b"x")).await.unwrap_err(),
            CoreError::Unsupported(_)
        ));
    }
}
