//! Parsing and caching of `WWW-Authenticate` challenges issued by an
//! upstream registry, keyed by the realm URL so a ping against one
//! repository can satisfy requests against another on the same host.

use std::collections::HashMap;

use parking_lot::Mutex;

/// A single parsed challenge. Only `Bearer` and `Basic` are meaningful
/// to a registry client; anything else is kept around verbatim but
/// never acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
    Basic,
}

impl Challenge {
    pub fn realm(&self) -> Option<&str> {
        match self {
            Challenge::Bearer { realm, .. } => Some(realm.as_str()),
            Challenge::Basic => None,
        }
    }
}

/// Splits a single `WWW-Authenticate` header value into its scheme and
/// quoted key=value parameters.
pub fn parse_www_authenticate(header: &str) -> Option<Challenge> {
    let header = header.trim();
    if let Some(rest) = header.strip_prefix("Bearer ") {
        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for part in rest.split(',') {
            let mut kv = part.splitn(2, '=');
            let key = kv.next()?.trim();
            let value = kv.next()?.trim().trim_matches('"');
            match key {
                "realm" => realm = Some(value.to_string()),
                "service" => service = Some(value.to_string()),
                "scope" => scope = Some(value.to_string()),
                _ => {}
            }
        }
        let realm = realm?;
        Some(Challenge::Bearer {
            realm,
            service,
            scope,
        })
    } else if header.starts_with("Basic") {
        Some(Challenge::Basic)
    } else {
        None
    }
}

/// Caches the challenge observed for each upstream root URL, so only
/// the first request against a host pays for the extra round trip.
#[derive(Default)]
pub struct ChallengeManager {
    challenges: Mutex<HashMap<String, Challenge>>,
}

impl ChallengeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, root_url: &str) -> Option<Challenge> {
        self.challenges.lock().get(root_url).cloned()
    }

    pub fn record(&self, root_url: &str, header: &str) -> Option<Challenge> {
        let challenge = parse_www_authenticate(header)?;
        self.challenges
            .lock()
            .insert(root_url.to_string(), challenge.clone());
        Some(challenge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bearer_challenge() {
        let header =
            r#"Bearer realm="https://auth.example.com/token",service="registry.example.com",scope="repository:foo:pull""#;
        let challenge = parse_www_authenticate(header).unwrap();
        assert_eq!(
            challenge,
            Challenge::Bearer {
                realm: "https://auth.example.com/token".to_string(),
                service: Some("registry.example.com".to_string()),
                scope: Some("repository:foo:pull".to_string()),
            }
        );
    }

    #[test]
    fn parses_basic_challenge() {
        assert_eq!(
            parse_www_authenticate(r#"Basic realm="registry""#).unwrap(),
            Challenge::Basic
        );
    }

    #[test]
    fn rejects_bearer_without_realm() {
        assert!(parse_www_authenticate(r#"Bearer service="registry""#).is_none());
    }

    #[test]
    fn manager_caches_by_root_url() {
        let manager = ChallengeManager::new();
        assert!(manager.get("https://registry-1.docker.io").is_none());
        manager.record(
            "https://registry-1.docker.io",
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io""#,
        );
        assert!(manager.get("https://registry-1.docker.io").is_some());
        assert!(manager.get("https://other.example.com").is_none());
    }
}
