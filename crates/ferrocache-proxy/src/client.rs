//! HTTP client for the upstream registry: authentication (bearer
//! token or basic) plus the read-only subset of the distribution API
//! this proxy needs (ping, manifest/blob stat and fetch, tag listing).
//! Push operations are out of scope — this proxy only ever pulls.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

use ferrocache_core::{Descriptor, Digest};

use crate::challenge::{Challenge, ChallengeManager};
use crate::credentials::CredentialStore;
use crate::error::ProxyError;

pub const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
    application/vnd.oci.image.index.v1+json, \
    application/vnd.docker.distribution.manifest.v2+json, \
    application/vnd.docker.distribution.manifest.list.v2+json, \
    application/vnd.docker.distribution.manifest.v1+prettyjws";

pub struct RemoteClient {
    root_url: Url,
    client: Client,
    challenges: Arc<ChallengeManager>,
    credentials: Arc<dyn CredentialStore>,
    token: Mutex<Option<String>>,
}

impl RemoteClient {
    pub fn new(
        root_url: Url,
        challenges: Arc<ChallengeManager>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, ProxyError> {
        Ok(Self {
            root_url,
            client: Client::builder().build()?,
            challenges,
            credentials,
            token: Mutex::new(None),
        })
    }

    fn root(&self) -> String {
        self.root_url.as_str().trim_end_matches('/').to_string()
    }

    fn host(&self) -> String {
        self.root_url.host_str().unwrap_or_default().to_string()
    }

    /// Pings `/v2/` and, if the upstream challenges with
    /// `WWW-Authenticate`, records it in the shared challenge manager
    /// keyed by this client's root URL. Returns `Ok` whether or not a
    /// challenge was present — establishing a challenge is not the
    /// same as authenticating.
    pub async fn ping(&self) -> Result<(), ProxyError> {
        let response = self.client.get(format!("{}/v2/", self.root())).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(header) = response
                .headers()
                .get("www-authenticate")
                .and_then(|h| h.to_str().ok())
            {
                self.challenges.record(self.root_url.as_str(), header);
            }
        }
        Ok(())
    }

    async fn fetch_bearer_token(
        &self,
        realm: &str,
        service: Option<&str>,
        scope: Option<&str>,
    ) -> Result<String, ProxyError> {
        let mut request = self.client.get(realm);
        let mut params = Vec::new();
        if let Some(service) = service {
            params.push(("service", service.to_string()));
        }
        if let Some(scope) = scope {
            params.push(("scope", scope.to_string()));
        }
        if !params.is_empty() {
            request = request.query(&params);
        }

        let credential = self.credentials.credential_for(&self.host()).await;
        if !credential.is_empty() {
            request = request.basic_auth(&credential.username, Some(&credential.secret));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ProxyError::TokenRefreshFailed);
        }

        #[derive(serde::Deserialize)]
        struct TokenResponse {
            #[serde(alias = "access_token")]
            token: String,
        }
        let parsed: TokenResponse = response.json().await?;
        Ok(parsed.token)
    }

    async fn auth_header(&self) -> Result<Option<String>, ProxyError> {
        if let Some(token) = self.token.lock().clone() {
            return Ok(Some(token));
        }

        let header = match self.challenges.get(self.root_url.as_str()) {
            Some(Challenge::Bearer {
                realm,
                service,
                scope,
            }) => {
                let token = self
                    .fetch_bearer_token(&realm, service.as_deref(), scope.as_deref())
                    .await?;
                let header = format!("Bearer {token}");
                *self.token.lock() = Some(header.clone());
                Some(header)
            }
            Some(Challenge::Basic) | None => {
                let credential = self.credentials.credential_for(&self.host()).await;
                if credential.is_empty() {
                    None
                } else {
                    Some(format!(
                        "Basic {}",
                        base64_encode(&format!("{}:{}", credential.username, credential.secret))
                    ))
                }
            }
        };
        Ok(header)
    }

    async fn authed(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, ProxyError> {
        Ok(match self.auth_header().await? {
            Some(header) => builder.header("Authorization", header),
            None => builder,
        })
    }

    /// Issues `builder`, retrying once with a cleared token cache if
    /// the upstream answers 401 (the cached bearer token expired).
    async fn send_with_retry(
        &self,
        make_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ProxyError> {
        let request = self.authed(make_request()).await?;
        let response = request.send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        debug!("upstream token expired, retrying");
        *self.token.lock() = None;
        let request = self.authed(make_request()).await?;
        Ok(request.send().await?)
    }

    pub async fn manifest_exists(&self, repository: &str, reference: &str) -> Result<bool, ProxyError> {
        let url = format!("{}/v2/{}/manifests/{}", self.root(), repository, reference);
        let response = self
            .send_with_retry(|| self.client.head(&url).header("Accept", MANIFEST_ACCEPT))
            .await?;
        Ok(response.status().is_success())
    }

    pub async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<(Bytes, Descriptor), ProxyError> {
        let url = format!("{}/v2/{}/manifests/{}", self.root(), repository, reference);
        let response = self
            .send_with_retry(|| self.client.get(&url).header("Accept", MANIFEST_ACCEPT))
            .await?;
        check_status(&response, reference)?;

        let media_type = response
            .headers()
            .get("content-type")
            .and_then(|h| h.to_str().ok())
            .unwrap_or("application/vnd.oci.image.manifest.v1+json")
            .to_string();
        let digest_header = response
            .headers()
            .get("docker-content-digest")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        let body = response.bytes().await?;
        let digest = match digest_header {
            Some(raw) => raw.parse().map_err(|_| {
                ProxyError::InvalidResponse(format!("invalid docker-content-digest: {raw}"))
            })?,
            None => Digest::sha256(&body),
        };

        Ok((
            body.clone(),
            Descriptor {
                digest,
                size: body.len() as i64,
                media_type,
            },
        ))
    }

    pub async fn blob_stat(&self, repository: &str, digest: &Digest) -> Result<Descriptor, ProxyError> {
        let url = format!("{}/v2/{}/blobs/{}", self.root(), repository, digest);
        let response = self.send_with_retry(|| self.client.head(&url)).await?;
        check_status(&response, &digest.to_string())?;
        let size = response
            .headers()
            .get("content-length")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Ok(Descriptor {
            digest: digest.clone(),
            size,
            media_type: response
                .headers()
                .get("content-type")
                .and_then(|h| h.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string(),
        })
    }

    pub async fn open_blob(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>, ProxyError> {
        let url = format!("{}/v2/{}/blobs/{}", self.root(), repository, digest);
        let response = self.send_with_retry(|| self.client.get(&url)).await?;
        check_status(&response, &digest.to_string())?;
        let stream = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(stream)))
    }

    pub async fn tag_list(&self, repository: &str) -> Result<Vec<String>, ProxyError> {
        let url = format!("{}/v2/{}/tags/list", self.root(), repository);
        let response = self.send_with_retry(|| self.client.get(&url)).await?;
        check_status(&response, repository)?;

        #[derive(serde::Deserialize)]
        struct TagsResponse {
            tags: Vec<String>,
        }
        let parsed: TagsResponse = response.json().await?;
        Ok(parsed.tags)
    }
}

fn check_status(response: &reqwest::Response, what: &str) -> Result<(), ProxyError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ProxyError::NotFound(what.to_string()));
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ProxyError::Unauthorized);
    }
    if !status.is_success() {
        return Err(ProxyError::Upstream {
            status: status.as_u16(),
            message: String::new(),
        });
    }
    Ok(())
}

fn base64_encode(input: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(input.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentialStore;

    #[tokio::test]
    async fn auth_header_is_none_without_challenge_or_credentials() {
        let client = RemoteClient::new(
            Url::parse("https://registry.example.com").unwrap(),
            Arc::new(ChallengeManager::new()),
            Arc::new(StaticCredentialStore::new("registry.example.com", "", "")),
        )
        .unwrap();
        assert!(client.auth_header().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auth_header_falls_back_to_basic_with_static_credentials() {
        let client = RemoteClient::new(
            Url::parse("https://registry.example.com").unwrap(),
            Arc::new(ChallengeManager::new()),
            Arc::new(StaticCredentialStore::new("registry.example.com", "alice", "hunter2")),
        )
        .unwrap();
        let header = client.auth_header().await.unwrap().unwrap();
        assert!(header.starts_with("Basic "));
    }
}
