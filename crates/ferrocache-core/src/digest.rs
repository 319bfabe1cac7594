//! Content digests and the descriptors built on top of them.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// An immutable `<algorithm>:<hex>` content identifier.
///
/// Equality is equality of bytes (algorithm and hex both compared
/// case-sensitively); a digest is the primary key for both blobs and
/// manifests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Compute the `sha256:<hex>` digest of `data`.
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Digest {
            algorithm: "sha256".to_string(),
            hex: hex::encode(hasher.finalize()),
        }
    }

    /// Verify that `data` hashes to this digest under its algorithm.
    pub fn verify(&self, data: &[u8]) -> bool {
        match self.algorithm.as_str() {
            "sha256" => Digest::sha256(data).hex == self.hex,
            _ => false,
        }
    }

    /// A filesystem-friendly two-character shard of the hex digest, the
    /// idiom every content-addressed layout below this crate uses to
    /// avoid a single directory with millions of entries.
    pub fn shard(&self) -> &str {
        &self.hex[..self.hex.len().min(2)]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidDigest(s.to_string()))?;
        if algorithm.is_empty() || hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidDigest(s.to_string()));
        }
        if algorithm == "sha256" && hex.len() != 64 {
            return Err(CoreError::InvalidDigest(s.to_string()));
        }
        Ok(Digest {
            algorithm: algorithm.to_string(),
            hex: hex.to_lowercase(),
        })
    }
}

impl TryFrom<String> for Digest {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.to_string()
    }
}

/// `{digest, size, media-type}` — metadata about a stored artifact
/// without its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub digest: Digest,
    pub size: i64,
    pub media_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_sha256_round_trips() {
        let s = "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let d: Digest = s.parse().unwrap();
        assert_eq!(d.to_string(), s);
        assert_eq!(d.shard(), "aa");
    }

    #[test]
    fn invalid_length_rejected() {
        let s = "sha256:aaaa";
        assert!(s.parse::<Digest>().is_err());
    }

    #[test]
    fn missing_colon_rejected() {
        assert!("not-a-digest".parse::<Digest>().is_err());
    }

    #[test]
    fn sha256_matches_known_vector() {
        let d = Digest::sha256(b"");
        assert_eq!(
            d.to_string(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(d.verify(b""));
        assert!(!d.verify(b"x"));
    }
}
