//! Credential sourcing for talking to an upstream registry: either a
//! fixed username/password pair, or an external helper program invoked
//! on demand and cached per host.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::process::Command;
use tracing::warn;

/// A username/secret pair to present to the upstream. An empty
/// username means "no credentials available".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub secret: String,
    pub refresh_token: String,
}

impl Credential {
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.secret.is_empty()
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credential_for(&self, host: &str) -> Credential;
}

/// A fixed map from upstream host to static basic-auth credentials.
/// `refresh_token` is always empty for this variant.
pub struct StaticCredentialStore {
    credentials: HashMap<String, Credential>,
}

impl StaticCredentialStore {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        let mut credentials = HashMap::new();
        credentials.insert(
            host.into(),
            Credential {
                username: username.into(),
                secret: password.into(),
                refresh_token: String::new(),
            },
        );
        Self { credentials }
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn credential_for(&self, host: &str) -> Credential {
        self.credentials.get(host).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct HelperOutput {
    username: String,
    secret: String,
}

struct CacheEntry {
    credential: Credential,
    expires_at: Option<Instant>,
}

/// Invokes an external program to retrieve credentials, caching the
/// result per host for an optional lifetime. A failed invocation
/// leaves whatever stale entry was already cached in place and simply
/// answers the current call with empty credentials, so the next call
/// retries rather than getting stuck on a permanently poisoned cache.
pub struct ExecCredentialStore {
    command: String,
    lifetime: Option<Duration>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl ExecCredentialStore {
    pub fn new(command: impl Into<String>, lifetime: Option<Duration>) -> Self {
        Self {
            command: command.into(),
            lifetime,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, host: &str) -> Option<Credential> {
        let cache = self.cache.lock();
        let entry = cache.get(host)?;
        match entry.expires_at {
            Some(expiry) if Instant::now() >= expiry => None,
            _ => Some(entry.credential.clone()),
        }
    }

    async fn invoke(&self, host: &str) -> Result<Credential, std::io::Error> {
        let output = Command::new(&self.command).arg(host).output().await?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "credential helper exited with {}",
                output.status
            )));
        }
        let parsed: HelperOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(Credential {
            username: parsed.username,
            secret: parsed.secret,
            refresh_token: String::new(),
        })
    }
}

#[async_trait]
impl CredentialStore for ExecCredentialStore {
    async fn credential_for(&self, host: &str) -> Credential {
        if let Some(credential) = self.cached(host) {
            return credential;
        }

        match self.invoke(host).await {
            Ok(credential) => {
                let expires_at = self.lifetime.map(|d| Instant::now() + d);
                self.cache.lock().insert(
                    host.to_string(),
                    CacheEntry {
                        credential: credential.clone(),
                        expires_at,
                    },
                );
                credential
            }
            Err(err) => {
                warn!(host, error = %err, "credential helper failed");
                Credential::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_store_returns_configured_credential() {
        let store = StaticCredentialStore::new("registry.example.com", "alice", "hunter2");
        let cred = store.credential_for("registry.example.com").await;
        assert_eq!(cred.username, "alice");
        assert_eq!(cred.secret, "hunter2");
        assert!(cred.refresh_token.is_empty());
    }

    #[tokio::test]
    async fn static_store_returns_empty_for_unknown_host() {
        let store = StaticCredentialStore::new("registry.example.com", "alice", "hunter2");
        assert!(store.credential_for("other.example.com").await.is_empty());
    }

    #[tokio::test]
    async fn exec_store_returns_empty_when_helper_missing() {
        let store = ExecCredentialStore::new("/nonexistent/credential-helper", None);
        let cred = store.credential_for("registry.example.com").await;
        assert!(cred.is_empty());
    }
}
