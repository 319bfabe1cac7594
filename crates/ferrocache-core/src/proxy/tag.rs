//! `ProxyTagService`: keeps a repository's mutable tags fresh. Unlike
//! blobs and manifests, tags are never content-addressed, so every
//! `Get` re-checks upstream rather than trusting a cached answer.

use async_trait::async_trait;
use std::sync::Arc;

use super::auth::AuthChallenger;
use super::metrics::ProxyMetrics;
use crate::digest::{Descriptor, Digest};
use crate::error::CoreError;
use crate::tag::TagService;

pub struct ProxyTagService {
    local: Arc<dyn TagService>,
    remote: Arc<dyn TagService>,
    auth: Arc<dyn AuthChallenger>,
    metrics: Arc<ProxyMetrics>,
}

impl ProxyTagService {
    pub fn new(
        local: Arc<dyn TagService>,
        remote: Arc<dyn TagService>,
        auth: Arc<dyn AuthChallenger>,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Self { local, remote, auth, metrics }
    }
}

#[async_trait]
impl TagService for ProxyTagService {
    async fn get(&self, tag: &str) -> Result<Descriptor, CoreError> {
        if self.auth.try_establish().await.is_ok() {
            if let Ok(descriptor) = self.remote.get(tag).await {
                // Overwrite: the remote answer always wins when reachable,
                // since it is the only source of truth for tag currency.
                self.local.tag(tag, &descriptor).await?;
                self.metrics.tags.record_miss(0, 0);
                return Ok(descriptor);
            }
        }
        let descriptor = self.local.get(tag).await?;
        self.metrics.tags.record_hit(0);
        Ok(descriptor)
    }

    async fn all(&self) -> Result<Vec<String>, CoreError> {
        if self.auth.try_establish().await.is_ok() {
            if let Ok(tags) = self.remote.all().await {
                return Ok(tags);
            }
        }
        self.local.all().await
    }

    async fn tag(&self, _tag: &str, _descriptor: &Descriptor) -> Result<(), CoreError> {
        Err(CoreError::Unsupported("Tag"))
    }

    async fn untag(&self, tag: &str) -> Result<(), CoreError> {
        self.local.untag(tag).await
    }

    async fn lookup(&self, _digest: &Digest) -> Result<Vec<String>, CoreError> {
        Err(CoreError::Unsupported("Lookup"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Descriptor;
    use crate::tag::LocalTagService;
    use ferrocache_storage::MemoryDriver;

    fn descriptor(seed: &[u8]) -> Descriptor {
        Descriptor {
            digest: Digest::sha256(seed),
            size: 1,
            media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
        }
    }

    fn setup() -> (ProxyTagService, Arc<dyn TagService>, Arc<dyn TagService>) {
        let local: Arc<dyn TagService> = Arc::new(LocalTagService::new(Arc::new(MemoryDriver::new()), "library/nginx"));
        let remote: Arc<dyn TagService> = Arc::new(LocalTagService::new(Arc::new(MemoryDriver::new()), "library/nginx"));
        let proxy = ProxyTagService::new(
            local.clone(),
            remote.clone(),
            Arc::new(super::super::auth::NoAuthChallenger),
            Arc::new(ProxyMetrics::default()),
        );
        (proxy, local, remote)
    }

    #[tokio::test]
    async fn get_overwrites_local_with_fresh_remote_answer() {
        let (proxy, local, remote) = setup();
        local.tag("latest", &descriptor(b"stale")).await.unwrap();
        remote.tag("latest", &descriptor(b"fresh")).await.unwrap();

        let got = proxy.get("latest").await.unwrap();
        assert_eq!(got, descriptor(b"fresh"));
        assert_eq!(local.get("latest").await.unwrap(), descriptor(b"fresh"));
        assert_eq!(proxy.metrics.tags.snapshot().misses, 1);
    }

    #[tokio::test]
    async fn get_falls_back_to_local_when_remote_has_no_such_tag() {
        let (proxy, local, _remote) = setup();
        local.tag("latest", &descriptor(b"only-local")).await.unwrap();

        let got = proxy.get("latest").await.unwrap();
        assert_eq!(got, descriptor(b"only-local"));
        assert_eq!(proxy.metrics.tags.snapshot().hits, 1);
    }

    #[tokio::test]
    async fn untag_is_local_only() {
        let (proxy, local, _remote) = setup();
        local.tag("latest", &descriptor(b"x")).await.unwrap();
        proxy.untag("latest").await.unwrap();
        assert!(local.get("latest").await.is_err());
    }

    #[tokio::test]
    async fn tag_and_lookup_are_unsupported() {
        let (proxy, _local, _remote) = setup();
        assert!(matches!(
            proxy.tag("latest", &descriptor(b"x")).await.unwrap_err(),
            CoreError::Unsupported(_)
        ));
        assert!(matches!(
            proxy.lookup(&Digest::sha256(b"x")).await.unwrap_err(),
            CoreError::Unsupported(_)
        ));
    }
}
