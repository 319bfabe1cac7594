//! `BlobStore` over the upstream HTTP client: the read side of the
//! capability set is real, every mutation returns `Unsupported` since
//! this proxy never pushes to the registry it mirrors.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use ferrocache_core::blobstore::{BlobResponseSink, BlobStore, BlobWriter};
use ferrocache_core::{CoreError, Descriptor, Digest};
use ferrocache_storage::ContentReader;

use crate::client::RemoteClient;
use crate::error::{map_to_core, ProxyError};

pub struct RemoteBlobStore {
    client: Arc<RemoteClient>,
    repository: String,
}

impl RemoteBlobStore {
    pub fn new(client: Arc<RemoteClient>, repository: impl Into<String>) -> Self {
        Self {
            client,
            repository: repository.into(),
        }
    }

    fn map_not_found(&self, err: ProxyError, digest: &Digest) -> CoreError {
        match err {
            ProxyError::NotFound(_) => CoreError::BlobUnknown(digest.clone()),
            other => map_to_core(other),
        }
    }
}

#[async_trait]
impl BlobStore for RemoteBlobStore {
    async fn stat(&self, digest: &Digest) -> Result<Descriptor, CoreError> {
        self.client
            .blob_stat(&self.repository, digest)
            .await
            .map_err(|e| self.map_not_found(e, digest))
    }

    async fn get(&self, digest: &Digest) -> Result<Bytes, CoreError> {
        let mut reader = self.open(digest).await?;
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf)
            .await
            .map_err(ferrocache_storage::StorageError::Io)?;
        Ok(Bytes::from(buf))
    }

    async fn put(&self, _media_type: &str, _content: Bytes) -> Result<Descriptor, CoreError> {
        Err(CoreError::Unsupported("remote blob store does not accept pushes"))
    }

    async fn create(&self) -> Result<Box<dyn BlobWriter>, CoreError> {
        Err(CoreError::Unsupported("remote blob store does not accept pushes"))
    }

    async fn resume(&self, _id: &str) -> Result<Box<dyn BlobWriter>, CoreError> {
        Err(CoreError::Unsupported("remote blob store does not accept pushes"))
    }

    async fn mount(&self, _digest: &Digest, _from_repository: &str) -> Result<Descriptor, CoreError> {
        Err(CoreError::Unsupported("remote blob store does not support cross-repository mounts"))
    }

    async fn open(&self, digest: &Digest) -> Result<ContentReader, CoreError> {
        let reader: Box<dyn tokio::io::AsyncRead + Send> = self
            .client
            .open_blob(&self.repository, digest)
            .await
            .map_err(|e| self.map_not_found(e, digest))?;
        Ok(Box::into_pin(reader))
    }

    async fn delete(&self, _digest: &Digest) -> Result<(), CoreError> {
        Err(CoreError::Unsupported("remote blob store does not accept deletes"))
    }

    async fn serve_blob(
        &self,
        sink: &mut (dyn BlobResponseSink + '_),
        digest: &Digest,
    ) -> Result<(), CoreError> {
        let descriptor = self.stat(digest).await?;
        sink.set_headers(&descriptor);
        let mut reader = self.open(digest).await?;
        tokio::io::copy(&mut reader, sink)
            .await
            .map_err(ferrocache_storage::StorageError::Io)?;
        Ok(())
    }
}
