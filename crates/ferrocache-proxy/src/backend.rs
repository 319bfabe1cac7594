//! `RemoteBackend`: the concrete, HTTP-speaking implementation of the
//! seam `ferrocache-core` uses to build per-repository remote stores
//! without depending on this crate.

use std::sync::Arc;

use url::Url;

use ferrocache_core::blobstore::BlobStore;
use ferrocache_core::manifest::ManifestService;
use ferrocache_core::proxy::auth::AuthChallenger;
use ferrocache_core::registry::RemoteBackend;
use ferrocache_core::tag::TagService;

use crate::auth::RegistryAuthChallenger;
use crate::blobstore::RemoteBlobStore;
use crate::challenge::ChallengeManager;
use crate::client::RemoteClient;
use crate::credentials::CredentialStore;
use crate::manifest::RemoteManifestStore;
use crate::tag::RemoteTagService;

pub struct RemoteRegistryBackend {
    client: Arc<RemoteClient>,
    challenger: Arc<dyn AuthChallenger>,
}

impl RemoteRegistryBackend {
    pub fn new(root_url: Url, credentials: Arc<dyn CredentialStore>) -> Result<Self, crate::error::ProxyError> {
        let challenges = Arc::new(ChallengeManager::new());
        let client = Arc::new(RemoteClient::new(root_url.clone(), challenges.clone(), credentials)?);
        let challenger = Arc::new(RegistryAuthChallenger::new(
            root_url.as_str().trim_end_matches('/').to_string(),
            client.clone(),
            challenges,
        ));
        Ok(Self { client, challenger })
    }
}

impl RemoteBackend for RemoteRegistryBackend {
    fn blob_store(&self, repository: &str) -> Arc<dyn BlobStore> {
        Arc::new(RemoteBlobStore::new(self.client.clone(), repository))
    }

    fn manifest_store(&self, repository: &str) -> Arc<dyn ManifestService> {
        Arc::new(RemoteManifestStore::new(self.client.clone(), repository))
    }

    fn tag_store(&self, repository: &str) -> Arc<dyn TagService> {
        Arc::new(RemoteTagService::new(self.client.clone(), repository))
    }

    fn auth_challenger(&self) -> Arc<dyn AuthChallenger> {
        self.challenger.clone()
    }
}
