//! Proxy configuration: the recognized options for one upstream
//! mirror. Parsing the surrounding config file/env layering is the
//! binary crate's job; this module only owns the shape and validation
//! of the proxy section once it has been deserialized.

use serde::Deserialize;
use std::time::Duration;

use crate::error::CoreError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecCredentialConfig {
    pub command: String,
    #[serde(with = "humantime_duration", default)]
    pub lifetime: Option<Duration>,
}

impl Default for ExecCredentialConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            lifetime: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "parameters", rename_all = "lowercase")]
pub enum EvictionPolicyConfig {
    None,
    Ttl {
        #[serde(with = "humantime_duration_required")]
        ttl: Duration,
    },
    Lru {
        #[serde(deserialize_with = "deserialize_human_size")]
        limit: u64,
    },
}

fn deserialize_human_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_human_size(&raw).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub remote_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub exec: Option<ExecCredentialConfig>,
    /// Legacy singular option: `ttl = "24h"` is equivalent to
    /// `eviction_policy = { type = "ttl", parameters = { ttl = "24h" } }`.
    /// Superseded by `eviction_policy` when both are present.
    #[serde(with = "humantime_duration")]
    pub ttl: Option<Duration>,
    pub eviction_policy: Option<EvictionPolicyConfig>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            remote_url: String::new(),
            username: None,
            password: None,
            exec: None,
            ttl: None,
            eviction_policy: None,
        }
    }
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.remote_url.is_empty() {
            return Err(CoreError::Upstream("remoteurl must not be empty".to_string()));
        }
        if let EvictionPolicyConfig::Lru { limit } = self.resolved_eviction_policy() {
            if limit == 0 {
                return Err(CoreError::Upstream("lru limit must be non-zero".to_string()));
            }
        }
        Ok(())
    }

    /// `eviction_policy` takes precedence over the legacy `ttl` option;
    /// if neither is set, the proxy caches forever.
    pub fn resolved_eviction_policy(&self) -> EvictionPolicyConfig {
        if let Some(policy) = &self.eviction_policy {
            return policy.clone();
        }
        if let Some(ttl) = self.ttl {
            return EvictionPolicyConfig::Ttl { ttl };
        }
        EvictionPolicyConfig::None
    }
}

/// Parses a human-readable byte size such as `"10GB"` or `"512Mi"`
/// into a byte count, the way `evictionpolicy.parameters.limit` is
/// expressed in configuration.
pub fn parse_human_size(s: &str) -> Result<u64, CoreError> {
    let s = s.trim();
    let split_at = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split_at);
    let number: f64 = number
        .parse()
        .map_err(|_| CoreError::Upstream(format!("invalid size: {s}")))?;

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1_000,
        "KI" | "KIB" => 1 << 10,
        "M" | "MB" => 1_000_000,
        "MI" | "MIB" => 1 << 20,
        "G" | "GB" => 1_000_000_000,
        "GI" | "GIB" => 1 << 30,
        "T" | "TB" => 1_000_000_000_000,
        "TI" | "TIB" => 1 << 40,
        other => return Err(CoreError::Upstream(format!("unrecognized size unit: {other}"))),
    };

    Ok((number * multiplier as f64) as u64)
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(s) if !s.is_empty() => humantime::parse_duration(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

mod humantime_duration_required {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_and_binary_sizes() {
        assert_eq!(parse_human_size("10GB").unwrap(), 10_000_000_000);
        assert_eq!(parse_human_size("1GiB").unwrap(), 1 << 30);
        assert_eq!(parse_human_size("512").unwrap(), 512);
    }

    #[test]
    fn rejects_unrecognized_unit() {
        assert!(parse_human_size("10XB").is_err());
    }

    #[test]
    fn validate_rejects_empty_remote_url() {
        let config = ProxyConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_lru_limit() {
        let config = ProxyConfig {
            remote_url: "https://registry-1.docker.io".to_string(),
            eviction_policy: Some(EvictionPolicyConfig::Lru { limit: 0 }),
            ..ProxyConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn legacy_ttl_resolves_to_ttl_policy_when_eviction_policy_unset() {
        let config = ProxyConfig {
            remote_url: "https://registry-1.docker.io".to_string(),
            ttl: Some(Duration::from_secs(3600)),
            ..ProxyConfig::default()
        };
        assert!(matches!(
            config.resolved_eviction_policy(),
            EvictionPolicyConfig::Ttl { ttl } if ttl == Duration::from_secs(3600)
        ));
    }

    #[test]
    fn eviction_policy_takes_precedence_over_legacy_ttl() {
        let config = ProxyConfig {
            remote_url: "https://registry-1.docker.io".to_string(),
            ttl: Some(Duration::from_secs(3600)),
            eviction_policy: Some(EvictionPolicyConfig::Lru { limit: 1024 }),
            ..ProxyConfig::default()
        };
        assert!(matches!(
            config.resolved_eviction_policy(),
            EvictionPolicyConfig::Lru { limit: 1024 }
        ));
    }
}
