//! Wires the upstream HTTP client into the core's `AuthChallenger`
//! seam: establishing a challenge means pinging `/v2/` once and
//! letting the response populate the shared challenge cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use ferrocache_core::CoreError;
use ferrocache_core::proxy::auth::AuthChallenger;

use crate::challenge::ChallengeManager;
use crate::client::RemoteClient;
use crate::error::map_to_core;

/// One per upstream. Guards the ping-and-populate sequence with a
/// mutex held across the network call, matching the spec's
/// description of a process-wide-per-upstream challenger: after the
/// first successful ping, every later call is a cache hit against the
/// shared `ChallengeManager` and returns immediately.
pub struct RegistryAuthChallenger {
    root_url: String,
    client: Arc<RemoteClient>,
    challenges: Arc<ChallengeManager>,
    establish: Mutex<()>,
    established: AtomicBool,
}

impl RegistryAuthChallenger {
    pub fn new(root_url: impl Into<String>, client: Arc<RemoteClient>, challenges: Arc<ChallengeManager>) -> Self {
        Self {
            root_url: root_url.into(),
            client,
            challenges,
            establish: Mutex::new(()),
            established: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl AuthChallenger for RegistryAuthChallenger {
    async fn try_establish(&self) -> Result<(), CoreError> {
        if self.established.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.establish.lock().await;
        if self.established.load(Ordering::Acquire) {
            return Ok(());
        }
        self.client.ping().await.map_err(map_to_core)?;
        self.established.store(true, Ordering::Release);
        info!(root_url = %self.root_url, "established upstream authentication challenge");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentialStore;
    use url::Url;

    #[tokio::test]
    async fn try_establish_is_idempotent_after_first_call_fails() {
        let challenges = Arc::new(ChallengeManager::new());
        let client = Arc::new(
            RemoteClient::new(
                Url::parse("http://127.0.0.1:1").unwrap(),
                challenges.clone(),
                Arc::new(StaticCredentialStore::new("127.0.0.1", "", "")),
            )
            .unwrap(),
        );
        let challenger = RegistryAuthChallenger::new("http://127.0.0.1:1", client, challenges);
        assert!(challenger.try_establish().await.is_err());
        assert!(!challenger.established.load(Ordering::Acquire));
    }
}
