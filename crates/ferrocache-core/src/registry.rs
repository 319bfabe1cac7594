//! `ProxyingRegistry`: composes a `ProxyBlobStore`, `ProxyManifestStore`,
//! and `ProxyTagService` per repository name, sharing process-wide
//! state (the inflight tracker, metrics, and eviction controller)
//! across every repository it serves.

use std::sync::Arc;

use ferrocache_storage::StorageDriver;

use crate::blobstore::{BlobStore, LocalBlobStore};
use crate::digest::Digest;
use crate::error::CoreError;
use crate::eviction::EvictionController;
use crate::manifest::{LocalManifestStore, ManifestService};
use crate::proxy::auth::AuthChallenger;
use crate::proxy::blobstore::ProxyBlobStore;
use crate::proxy::inflight::InflightTracker;
use crate::proxy::manifest::ProxyManifestStore;
use crate::proxy::metrics::ProxyMetrics;
use crate::proxy::tag::ProxyTagService;
use crate::reference::CanonicalReference;
use crate::tag::LocalTagService;
use crate::vacuum::Vacuum;

/// What the registry needs from a concrete upstream transport, without
/// depending on the crate that speaks HTTP. A reqwest-backed
/// implementation of this trait is what turns this core crate into a
/// working proxy.
pub trait RemoteBackend: Send + Sync {
    fn blob_store(&self, repository: &str) -> Arc<dyn BlobStore>;
    fn manifest_store(&self, repository: &str) -> Arc<dyn ManifestService>;
    fn tag_store(&self, repository: &str) -> Arc<dyn crate::tag::TagService>;
    fn auth_challenger(&self) -> Arc<dyn AuthChallenger>;
}

/// The three proxying capability sets for one repository name, bundled
/// the way an HTTP handler (outside this crate) would hold them for
/// the duration of a single request.
pub struct Repository {
    pub blobs: ProxyBlobStore,
    pub manifests: ProxyManifestStore,
    pub tags: ProxyTagService,
}

pub struct ProxyingRegistry {
    local_blobs: Arc<dyn BlobStore>,
    local_manifests: Arc<dyn ManifestService>,
    driver: Arc<dyn StorageDriver>,
    remote: Arc<dyn RemoteBackend>,
    scheduler: Option<Arc<dyn EvictionController>>,
    inflight: InflightTracker,
    metrics: Arc<ProxyMetrics>,
}

impl ProxyingRegistry {
    /// `scheduler` is expected to already have been constructed with
    /// expire callbacks from [`blob_expire_callback`] /
    /// [`manifest_expire_callback`] and started.
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        remote: Arc<dyn RemoteBackend>,
        scheduler: Option<Arc<dyn EvictionController>>,
    ) -> Self {
        Self {
            local_blobs: Arc::new(LocalBlobStore::new(driver.clone())),
            local_manifests: Arc::new(LocalManifestStore::new(driver.clone())),
            driver,
            remote,
            scheduler,
            inflight: InflightTracker::new(),
            metrics: Arc::new(ProxyMetrics::default()),
        }
    }

    /// An expire callback suitable for an [`EvictionController`]'s
    /// `on_blob_expire`: removes the blob from local storage entirely,
    /// independent of which repository's entry triggered the eviction.
    pub fn blob_expire_callback(driver: Arc<dyn StorageDriver>) -> crate::eviction::ExpireCallback {
        Arc::new(move |reference: CanonicalReference| {
            let vacuum = Vacuum::new(driver.clone());
            Box::pin(async move { vacuum.remove_blob(&reference.digest).await })
        })
    }

    /// An expire callback suitable for `on_manifest_expire`: removes
    /// just that manifest digest from the local manifest store.
    pub fn manifest_expire_callback(driver: Arc<dyn StorageDriver>) -> crate::eviction::ExpireCallback {
        Arc::new(move |reference: CanonicalReference| {
            let manifests = LocalManifestStore::new(driver.clone());
            Box::pin(async move { manifests.delete(&reference.digest).await })
        })
    }

    pub fn repository(&self, name: &str) -> Repository {
        let auth = self.remote.auth_challenger();
        Repository {
            blobs: ProxyBlobStore::new(
                self.local_blobs.clone(),
                self.remote.blob_store(name),
                self.scheduler.clone(),
                name,
                auth.clone(),
                self.inflight.clone(),
                self.metrics.clone(),
            ),
            manifests: ProxyManifestStore::new(
                self.local_manifests.clone(),
                self.remote.manifest_store(name),
                self.scheduler.clone(),
                name,
                auth.clone(),
                self.metrics.clone(),
            ),
            tags: ProxyTagService::new(
                Arc::new(LocalTagService::new(self.driver.clone(), name)),
                self.remote.tag_store(name),
                auth,
                self.metrics.clone(),
            ),
        }
    }

    /// Remove every local trace of a repository's tags. Blobs and
    /// manifests are digest-keyed and untouched — they may still be
    /// referenced by another repository or still be within their TTL.
    pub async fn remove_repository(&self, name: &str) -> Result<(), CoreError> {
        Vacuum::new(self.driver.clone()).remove_repository(name).await
    }

    pub async fn stat_local_blob(&self, digest: &Digest) -> Result<crate::digest::Descriptor, CoreError> {
        self.local_blobs.stat(digest).await
    }

    pub fn metrics(&self) -> Arc<ProxyMetrics> {
        self.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::auth::NoAuthChallenger;
    use ferrocache_storage::MemoryDriver;

    struct LoopbackBackend {
        blobs: Arc<dyn BlobStore>,
        manifests: Arc<dyn ManifestService>,
    }

    impl RemoteBackend for LoopbackBackend {
        fn blob_store(&self, _repository: &str) -> Arc<dyn BlobStore> {
            self.blobs.clone()
        }
        fn manifest_store(&self, _repository: &str) -> Arc<dyn ManifestService> {
            self.manifests.clone()
        }
        fn tag_store(&self, repository: &str) -> Arc<dyn crate::tag::TagService> {
            Arc::new(LocalTagService::new(Arc::new(MemoryDriver::new()), repository))
        }
        fn auth_challenger(&self) -> Arc<dyn AuthChallenger> {
            Arc::new(NoAuthChallenger)
        }
    }

    #[tokio::test]
    async fn repository_serves_blob_miss_through_remote_backend() {
        let driver: Arc<dyn StorageDriver> = Arc::new(MemoryDriver::new());
        let remote_driver: Arc<dyn StorageDriver> = Arc::new(MemoryDriver::new());
        let remote_blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(remote_driver));
        let descriptor = remote_blobs
            .put("text/plain", bytes::Bytes::from_static(b"upstream bytes"))
            .await
            .unwrap();

        let remote = Arc::new(LoopbackBackend {
            blobs: remote_blobs,
            manifests: Arc::new(LocalManifestStore::new(Arc::new(MemoryDriver::new()))),
        });
        let registry = ProxyingRegistry::new(driver, remote, None);
        let repo = registry.repository("library/nginx");

        let got = repo.blobs.get(&descriptor.digest).await.unwrap();
        assert_eq!(got, bytes::Bytes::from_static(b"upstream bytes"));
    }
}
