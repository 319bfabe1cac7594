//! `ManifestService` over the upstream HTTP client. `exists`/`get` are
//! addressed by digest only, the same as the local store; the client
//! resolves that digest to a manifest reference string before issuing
//! the request since the upstream API takes either a digest or a tag.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use ferrocache_core::manifest::ManifestService;
use ferrocache_core::{CoreError, Descriptor, Digest};

use crate::client::RemoteClient;
use crate::error::{map_to_core, ProxyError};

pub struct RemoteManifestStore {
    client: Arc<RemoteClient>,
    repository: String,
}

impl RemoteManifestStore {
    pub fn new(client: Arc<RemoteClient>, repository: impl Into<String>) -> Self {
        Self {
            client,
            repository: repository.into(),
        }
    }

    fn map_not_found(&self, err: ProxyError, digest: &Digest) -> CoreError {
        match err {
            ProxyError::NotFound(_) => CoreError::ManifestUnknown(digest.clone()),
            other => map_to_core(other),
        }
    }
}

#[async_trait]
impl ManifestService for RemoteManifestStore {
    async fn exists(&self, digest: &Digest) -> Result<bool, CoreError> {
        self.client
            .manifest_exists(&self.repository, &digest.to_string())
            .await
            .map_err(map_to_core)
    }

    async fn get(&self, digest: &Digest) -> Result<(Bytes, Descriptor), CoreError> {
        self.client
            .get_manifest(&self.repository, &digest.to_string())
            .await
            .map_err(|e| self.map_not_found(e, digest))
    }

    async fn put(&self, _media_type: &str, _content: Bytes) -> Result<Descriptor, CoreError> {
        Err(CoreError::Unsupported("remote manifest store does not accept pushes"))
    }

    async fn delete(&self, _digest: &Digest) -> Result<(), CoreError> {
        Err(CoreError::Unsupported("remote manifest store does not accept deletes"))
    }
}
