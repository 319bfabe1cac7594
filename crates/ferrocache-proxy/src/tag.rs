//! `TagService` over the upstream HTTP client. A tag resolves to a
//! manifest descriptor the same way a digest reference does, so
//! `get` reuses the manifest fetch path keyed by tag name instead of
//! digest.

use std::sync::Arc;

use async_trait::async_trait;

use ferrocache_core::tag::TagService;
use ferrocache_core::{CoreError, Descriptor, Digest};

use crate::client::RemoteClient;
use crate::error::{map_to_core, ProxyError};

pub struct RemoteTagService {
    client: Arc<RemoteClient>,
    repository: String,
}

impl RemoteTagService {
    pub fn new(client: Arc<RemoteClient>, repository: impl Into<String>) -> Self {
        Self {
            client,
            repository: repository.into(),
        }
    }
}

#[async_trait]
impl TagService for RemoteTagService {
    async fn get(&self, tag: &str) -> Result<Descriptor, CoreError> {
        let (_, descriptor) = self
            .client
            .get_manifest(&self.repository, tag)
            .await
            .map_err(|e| match e {
                ProxyError::NotFound(_) => CoreError::TagUnknown(tag.to_string()),
                other => map_to_core(other),
            })?;
        Ok(descriptor)
    }

    async fn all(&self) -> Result<Vec<String>, CoreError> {
        self.client.tag_list(&self.repository).await.map_err(map_to_core)
    }

    async fn tag(&self, _tag: &str, _descriptor: &Descriptor) -> Result<(), CoreError> {
        Err(CoreError::Unsupported("remote tag store does not accept tagging"))
    }

    async fn untag(&self, _tag: &str) -> Result<(), CoreError> {
        Err(CoreError::Unsupported("remote tag store does not accept untagging"))
    }

    async fn lookup(&self, _digest: &Digest) -> Result<Vec<String>, CoreError> {
        Err(CoreError::Unsupported("remote tag store does not support reverse lookup"))
    }
}
