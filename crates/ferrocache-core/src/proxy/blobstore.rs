//! `ProxyBlobStore`: the pull-through path for blobs. `ServeBlob` is
//! the hard case — deduplicated inflight fetches tee-streamed to both
//! the response and local storage.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{info, warn};

use ferrocache_storage::ContentReader;

use super::auth::AuthChallenger;
use super::inflight::InflightTracker;
use super::metrics::ProxyMetrics;
use crate::blobstore::{tee_copy, BlobResponseSink, BlobStore, BlobWriter};
use crate::digest::{Descriptor, Digest};
use crate::error::CoreError;
use crate::eviction::{EntryType, EvictionController};
use crate::reference::CanonicalReference;

pub struct ProxyBlobStore {
    local: Arc<dyn BlobStore>,
    remote: Arc<dyn BlobStore>,
    scheduler: Option<Arc<dyn EvictionController>>,
    repository_name: String,
    auth: Arc<dyn AuthChallenger>,
    inflight: InflightTracker,
    metrics: Arc<ProxyMetrics>,
}

impl ProxyBlobStore {
    pub fn new(
        local: Arc<dyn BlobStore>,
        remote: Arc<dyn BlobStore>,
        scheduler: Option<Arc<dyn EvictionController>>,
        repository_name: impl Into<String>,
        auth: Arc<dyn AuthChallenger>,
        inflight: InflightTracker,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Self {
            local,
            remote,
            scheduler,
            repository_name: repository_name.into(),
            auth,
            inflight,
            metrics,
        }
    }

    async fn register(&self, digest: &Digest) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        let reference = CanonicalReference::new(self.repository_name.clone(), digest.clone());
        if let Err(e) = scheduler.register(&reference, EntryType::Blob).await {
            warn!(digest = %digest, error = %e, "failed to register blob with eviction controller");
        }
    }
}

#[async_trait]
impl BlobStore for ProxyBlobStore {
    async fn stat(&self, digest: &Digest) -> Result<Descriptor, CoreError> {
        match self.local.stat(digest).await {
            Ok(descriptor) => Ok(descriptor),
            Err(e) if e.is_unknown() => {
                self.auth.try_establish().await?;
                self.remote.stat(digest).await
            }
            Err(e) => Err(e),
        }
    }

    async fn get(&self, digest: &Digest) -> Result<Bytes, CoreError> {
        match self.local.get(digest).await {
            Ok(bytes) => {
                self.metrics.blobs.record_hit(bytes.len() as u64);
                Ok(bytes)
            }
            Err(e) if e.is_unknown() => {
                self.auth.try_establish().await?;
                let bytes = self.remote.get(digest).await?;
                self.metrics.blobs.record_miss(bytes.len() as u64, bytes.len() as u64);
                self.local.put("", bytes.clone()).await?;
                self.register(digest).await;
                Ok(bytes)
            }
            Err(e) => Err(e),
        }
    }

    async fn put(&self, _media_type: &str, _content: Bytes) -> Result<Descriptor, CoreError> {
        Err(CoreError::Unsupported("Put"))
    }

    async fn create(&self) -> Result<Box<dyn BlobWriter>, CoreError> {
        Err(CoreError::Unsupported("Create"))
    }

    async fn resume(&self, _id: &str) -> Result<Box<dyn BlobWriter>, CoreError> {
        Err(CoreError::Unsupported("Resume"))
    }

    async fn mount(&self, _digest: &Digest, _from_repository: &str) -> Result<Descriptor, CoreError> {
        Err(CoreError::Unsupported("Mount"))
    }

    async fn open(&self, _digest: &Digest) -> Result<ContentReader, CoreError> {
        Err(CoreError::Unsupported("Open"))
    }

    async fn delete(&self, _digest: &Digest) -> Result<(), CoreError> {
        Err(CoreError::Unsupported("Delete"))
    }

    async fn serve_blob(
        &self,
        sink: &mut (dyn BlobResponseSink + '_),
        digest: &Digest,
    ) -> Result<(), CoreError> {
        // Step 1: local hit serves directly, no pull-through involved.
        if let Ok(descriptor) = self.local.stat(digest).await {
            self.metrics.blobs.record_hit(descriptor.size.max(0) as u64);
            return self.local.serve_blob(sink, digest).await;
        }

        // Step 2: establish upstream challenges before any remote call.
        self.auth.try_establish().await?;

        // Step 3: a concurrent fetch is already populating the cache —
        // stream straight from upstream without a second local copy.
        let Some(_guard) = self.inflight.try_claim(digest) else {
            let descriptor = self.remote.stat(digest).await?;
            sink.set_headers(&descriptor);
            let mut reader = self.remote.open(digest).await?;
            let copied = tokio::io::copy(&mut reader, sink)
                .await
                .map_err(ferrocache_storage::StorageError::Io)?;
            self.metrics.blobs.record_miss(copied, copied);
            return Ok(());
        };

        // Step 4/5: sole fetcher — tee bytes to both the response and
        // a local writer so the next request is a local hit.
        let result = self.populate_and_serve(sink, digest).await;
        // `_guard`'s drop releases the inflight entry regardless of outcome.
        result
    }
}

impl ProxyBlobStore {
    async fn populate_and_serve(
        &self,
        sink: &mut (dyn BlobResponseSink + '_),
        digest: &Digest,
    ) -> Result<(), CoreError> {
        let descriptor = self.remote.stat(digest).await?;
        sink.set_headers(&descriptor);

        let mut writer = self.local.create().await?;
        let mut reader = self.remote.open(digest).await?;

        match tee_copy(&mut reader, writer.as_mut(), sink).await {
            Ok(copied) => {
                if let Err(e) = writer.commit(digest).await {
                    writer.cancel().await.ok();
                    return Err(e);
                }
                self.metrics.blobs.record_miss(copied, copied);
                self.register(digest).await;
                info!(digest = %digest, "populated blob via pull-through");
                Ok(())
            }
            Err(e) => {
                writer.cancel().await.ok();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::LocalBlobStore;
    use crate::digest::Descriptor;
    use ferrocache_storage::MemoryDriver;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    struct VecSink {
        buf: Vec<u8>,
        headers: Option<Descriptor>,
    }

    impl BlobResponseSink for VecSink {
        fn set_headers(&mut self, descriptor: &Descriptor) {
            self.headers = Some(descriptor.clone());
        }
    }

    impl tokio::io::AsyncWrite for VecSink {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
            self.get_mut().buf.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn setup() -> (ProxyBlobStore, Arc<dyn BlobStore>, Arc<dyn BlobStore>) {
        let local: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(Arc::new(MemoryDriver::new())));
        let remote: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(Arc::new(MemoryDriver::new())));
        let proxy = ProxyBlobStore::new(
            local.clone(),
            remote.clone(),
            None,
            "library/nginx",
            Arc::new(super::super::auth::NoAuthChallenger),
            InflightTracker::new(),
            Arc::new(ProxyMetrics::default()),
        );
        (proxy, local, remote)
    }

    #[tokio::test]
    async fn serve_blob_on_local_hit_does_not_touch_remote() {
        let (proxy, local, _remote) = setup();
        let descriptor = local.put("text/plain", Bytes::from_static(b"cached")).await.unwrap();

        let mut sink = VecSink { buf: Vec::new(), headers: None };
        proxy.serve_blob(&mut sink, &descriptor.digest).await.unwrap();

        assert_eq!(sink.buf, b"cached");
        assert_eq!(proxy.metrics.blobs.snapshot().hits, 1);
    }

    #[tokio::test]
    async fn serve_blob_on_miss_populates_local_and_streams() {
        let (proxy, local, remote) = setup();
        let descriptor = remote.put("text/plain", Bytes::from_static(b"from upstream")).await.unwrap();

        let mut sink = VecSink { buf: Vec::new(), headers: None };
        proxy.serve_blob(&mut sink, &descriptor.digest).await.unwrap();

        assert_eq!(sink.buf, b"from upstream");
        assert!(local.stat(&descriptor.digest).await.is_ok());
        assert_eq!(proxy.metrics.blobs.snapshot().misses, 1);
    }

    #[tokio::test]
    async fn unsupported_operations_return_unsupported() {
        let (proxy, _local, _remote) = setup();
        assert!(matches!(
            proxy.put("text/plain", Bytes::new()).await.unwrap_err(),
            CoreError::Unsupported(_)
        ));
        let create_err = match proxy.create().await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(create_err, CoreError::Unsupported(_)));
        assert!(matches!(proxy.delete(&Digest::sha256(b"x")).await.unwrap_err(), CoreError::Unsupported(_)));
    }

    #[tokio::test]
    async fn stat_falls_back_to_remote_on_local_miss() {
        let (proxy, _local, remote) = setup();
        let descriptor = remote.put("text/plain", Bytes::from_static(b"remote only")).await.unwrap();
        let stat = proxy.stat(&descriptor.digest).await.unwrap();
        assert_eq!(stat, descriptor);
    }
}
