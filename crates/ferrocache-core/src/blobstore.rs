//! The `BlobStore` capability set and its local, storage-driver-backed
//! implementation.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncWrite;
use uuid::Uuid;

use ferrocache_storage::{StorageDriver, StorageError};

use crate::digest::{Descriptor, Digest};
use crate::error::CoreError;

/// Sink a `ServeBlob` call writes response bytes and headers into.
/// The HTTP framing itself lives outside this crate; this trait is the
/// narrow seam `ServeBlob` needs to set headers before streaming.
pub trait BlobResponseSink: AsyncWrite + Unpin + Send {
    fn set_headers(&mut self, descriptor: &Descriptor);
}

/// A resumable upload session, as returned by `create`/`resume`.
#[async_trait]
pub trait BlobWriter: Send {
    fn id(&self) -> &str;
    async fn write(&mut self, buf: &[u8]) -> Result<usize, CoreError>;
    fn size(&self) -> u64;
    async fn commit(&mut self, digest: &Digest) -> Result<Descriptor, CoreError>;
    async fn cancel(&mut self) -> Result<(), CoreError>;
}

/// The capability set a blob-bearing store exposes, shared by local
/// and remote (upstream) implementations alike.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn stat(&self, digest: &Digest) -> Result<Descriptor, CoreError>;
    async fn get(&self, digest: &Digest) -> Result<Bytes, CoreError>;
    async fn put(&self, media_type: &str, content: Bytes) -> Result<Descriptor, CoreError>;
    async fn create(&self) -> Result<Box<dyn BlobWriter>, CoreError>;
    async fn resume(&self, id: &str) -> Result<Box<dyn BlobWriter>, CoreError>;
    async fn mount(&self, digest: &Digest, from_repository: &str) -> Result<Descriptor, CoreError>;
    async fn open(&self, digest: &Digest) -> Result<ferrocache_storage::ContentReader, CoreError>;
    async fn delete(&self, digest: &Digest) -> Result<(), CoreError>;

    /// Serve a blob's bytes directly into `sink`, setting response
    /// headers first. The default implementation stats then streams
    /// through `open`; a remote store overrides this to stream without
    /// a local round-trip.
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
            .map_err(StorageError::Io)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDescriptor {
    digest: String,
    size: i64,
    media_type: String,
}

/// Blobs live under `/blobs/<algorithm>/<shard>/<hex>/{data,descriptor.json}`.
/// The proxy never constructs these paths itself — only this store does.
pub struct LocalBlobStore {
    driver: Arc<dyn StorageDriver>,
}

impl LocalBlobStore {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        Self { driver }
    }

    fn data_path(digest: &Digest) -> String {
        format!(
            "/blobs/{}/{}/{}/data",
            digest.algorithm(),
            digest.shard(),
            digest.hex()
        )
    }

    fn descriptor_path(digest: &Digest) -> String {
        format!(
            "/blobs/{}/{}/{}/descriptor.json",
            digest.algorithm(),
            digest.shard(),
            digest.hex()
        )
    }

    fn upload_path(id: &str) -> String {
        format!("/uploads/{}", id)
    }

    async fn read_descriptor(&self, digest: &Digest) -> Result<Descriptor, CoreError> {
        match self.driver.get_content(&Self::descriptor_path(digest)).await {
            Ok(bytes) => {
                let stored: StoredDescriptor = serde_json::from_slice(&bytes)
                    .map_err(|e| CoreError::StateCorrupt(e.to_string()))?;
                Ok(Descriptor {
                    digest: digest.clone(),
                    size: stored.size,
                    media_type: stored.media_type,
                })
            }
            Err(e) if e.is_not_found() => Err(CoreError::BlobUnknown(digest.clone())),
            Err(e) => Err(CoreError::Storage(e)),
        }
    }

    async fn write_descriptor(&self, descriptor: &Descriptor) -> Result<(), CoreError> {
        let stored = StoredDescriptor {
            digest: descriptor.digest.to_string(),
            size: descriptor.size,
            media_type: descriptor.media_type.clone(),
        };
        let bytes = Bytes::from(serde_json::to_vec(&stored).expect("descriptor serializes"));
        self.driver
            .put_content(&Self::descriptor_path(&descriptor.digest), bytes)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn stat(&self, digest: &Digest) -> Result<Descriptor, CoreError> {
        // A zero-size file is tolerated as "absent" — a cancelled
        // concurrent write can leave one behind transiently.
        match self.driver.stat(&Self::data_path(digest)).await {
            Ok(info) if info.size == 0 => Err(CoreError::BlobUnknown(digest.clone())),
            Ok(_) => self.read_descriptor(digest).await,
            Err(e) if e.is_not_found() => Err(CoreError::BlobUnknown(digest.clone())),
            Err(e) => Err(CoreError::Storage(e)),
        }
    }

    async fn get(&self, digest: &Digest) -> Result<Bytes, CoreError> {
        self.stat(digest).await?;
        match self.driver.get_content(&Self::data_path(digest)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.is_not_found() => Err(CoreError::BlobUnknown(digest.clone())),
            Err(e) => Err(CoreError::Storage(e)),
        }
    }

    async fn put(&self, media_type: &str, content: Bytes) -> Result<Descriptor, CoreError> {
        let digest = Digest::sha256(&content);
        let descriptor = Descriptor {
            digest: digest.clone(),
            size: content.len() as i64,
            media_type: media_type.to_string(),
        };
        self.driver.put_content(&Self::data_path(&digest), content).await?;
        self.write_descriptor(&descriptor).await?;
        Ok(descriptor)
    }

    async fn create(&self) -> Result<Box<dyn BlobWriter>, CoreError> {
        let id = Uuid::new_v4().to_string();
        let path = Self::upload_path(&id);
        let writer = self.driver.writer(&path, false).await?;
        Ok(Box::new(LocalBlobWriter {
            driver: self.driver.clone(),
            id,
            path,
            writer: Some(writer),
            size: 0,
        }))
    }

    async fn resume(&self, id: &str) -> Result<Box<dyn BlobWriter>, CoreError> {
        let path = Self::upload_path(id);
        let info = self.driver.stat(&path).await?;
        let writer = self.driver.writer(&path, true).await?;
        Ok(Box::new(LocalBlobWriter {
            driver: self.driver.clone(),
            id: id.to_string(),
            path,
            writer: Some(writer),
            size: info.size,
        }))
    }

    async fn mount(&self, digest: &Digest, _from_repository: &str) -> Result<Descriptor, CoreError> {
        // Mounting is a metadata-only operation once the blob already
        // lives in this content-addressed store under its digest.
        self.stat(digest).await
    }

    async fn open(&self, digest: &Digest) -> Result<ferrocache_storage::ContentReader, CoreError> {
        self.stat(digest).await?;
        self.driver
            .reader(&Self::data_path(digest), 0)
            .await
            .map_err(CoreError::Storage)
    }

    async fn delete(&self, digest: &Digest) -> Result<(), CoreError> {
        let data_deleted = self.driver.delete(&Self::data_path(digest)).await;
        let desc_deleted = self.driver.delete(&Self::descriptor_path(digest)).await;
        match (data_deleted, desc_deleted) {
            (Err(e), _) if !e.is_not_found() => Err(CoreError::Storage(e)),
            (_, Err(e)) if !e.is_not_found() => Err(CoreError::Storage(e)),
            (Err(_), Err(_)) => Err(CoreError::BlobUnknown(digest.clone())),
            _ => Ok(()),
        }
    }
}

struct LocalBlobWriter {
    driver: Arc<dyn StorageDriver>,
    id: String,
    path: String,
    writer: Option<Box<dyn ferrocache_storage::FileWriter>>,
    size: u64,
}

#[async_trait]
impl BlobWriter for LocalBlobWriter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, CoreError> {
        let writer = self.writer.as_mut().expect("writer session active");
        let n = writer.write(buf).await?;
        self.size += n as u64;
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn commit(&mut self, digest: &Digest) -> Result<Descriptor, CoreError> {
        let mut writer = self.writer.take().expect("writer session active");
        writer.commit().await?;
        writer.close().await?;

        let data = self.driver.get_content(&self.path).await?;
        if !digest.verify(&data) {
            self.driver.delete(&self.path).await.ok();
            return Err(CoreError::InvalidDigest(digest.to_string()));
        }

        let data_path = LocalBlobStore::data_path(digest);
        self.driver.mv(&self.path, &data_path).await?;

        let descriptor = Descriptor {
            digest: digest.clone(),
            size: data.len() as i64,
            media_type: "application/octet-stream".to_string(),
        };
        let store = LocalBlobStore::new(self.driver.clone());
        store.write_descriptor(&descriptor).await?;
        Ok(descriptor)
    }

    async fn cancel(&mut self) -> Result<(), CoreError> {
        if let Some(mut writer) = self.writer.take() {
            writer.cancel().await?;
        }
        Ok(())
    }
}

/// Copy every byte from `reader` into both `writer` (a resumable upload
/// session) and `sink` (the response), chunk by chunk. `ServeBlob` uses
/// this instead of a generic `AsyncWrite` tee so that writes to the
/// local session go through its own async trait method rather than a
/// hand-rolled `poll_write` shim around it.
pub async fn tee_copy<S: AsyncWrite + Unpin + ?Sized>(
    reader: &mut ferrocache_storage::ContentReader,
    writer: &mut dyn BlobWriter,
    sink: &mut S,
) -> Result<u64, CoreError> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await.map_err(StorageError::Io)?;
        if n == 0 {
            break;
        }
        writer.write(&buf[..n]).await?;
        sink.write_all(&buf[..n]).await.map_err(StorageError::Io)?;
        total += n as u64;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrocache_storage::MemoryDriver;

    fn store() -> LocalBlobStore {
        LocalBlobStore::new(Arc::new(MemoryDriver::new()))
    }

    #[tokio::test]
    async fn put_then_get_then_stat() {
        let s = store();
        let content = Bytes::from_static(b"hello world");
        let descriptor = s.put("text/plain", content.clone()).await.unwrap();
        assert_eq!(descriptor.size, content.len() as i64);

        let got = s.get(&descriptor.digest).await.unwrap();
        assert_eq!(got, content);

        let stat = s.stat(&descriptor.digest).await.unwrap();
        assert_eq!(stat.media_type, "text/plain");
    }

    #[tokio::test]
    async fn stat_unknown_digest_is_blob_unknown() {
        let s = store();
        let digest = Digest::sha256(b"nonexistent");
        assert!(matches!(
            s.stat(&digest).await.unwrap_err(),
            CoreError::BlobUnknown(_)
        ));
    }

    #[tokio::test]
    async fn create_write_commit_round_trips() {
        let s = store();
        let content = b"chunked upload content";
        let digest = Digest::sha256(content);

        let mut writer = s.create().await.unwrap();
        writer.write(&content[..10]).await.unwrap();
        writer.write(&content[10..]).await.unwrap();
        assert_eq!(writer.size(), content.len() as u64);

        let descriptor = writer.commit(&digest).await.unwrap();
        assert_eq!(descriptor.digest, digest);

        let got = s.get(&digest).await.unwrap();
        assert_eq!(&got[..], content);
    }

    #[tokio::test]
    async fn commit_with_wrong_digest_fails_and_leaves_nothing() {
        let s = store();
        let mut writer = s.create().await.unwrap();
        writer.write(b"actual content").await.unwrap();

        let wrong_digest = Digest::sha256(b"different content");
        assert!(writer.commit(&wrong_digest).await.is_err());
        assert!(matches!(
            s.stat(&wrong_digest).await.unwrap_err(),
            CoreError::BlobUnknown(_)
        ));
    }

    #[tokio::test]
    async fn delete_then_stat_is_unknown() {
        let s = store();
        let descriptor = s.put("application/octet-stream", Bytes::from_static(b"x")).await.unwrap();
        s.delete(&descriptor.digest).await.unwrap();
        assert!(matches!(
            s.stat(&descriptor.digest).await.unwrap_err(),
            CoreError::BlobUnknown(_)
        ));
    }
}
