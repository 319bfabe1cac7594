//! Canonical references: `repository@digest`.

use std::fmt;
use std::str::FromStr;

use crate::digest::Digest;
use crate::error::CoreError;

/// A `(repository-name, digest)` pair. The repository name carries no
/// ownership of the bytes — many repositories may reference the same
/// digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalReference {
    pub repository: String,
    pub digest: Digest,
}

impl CanonicalReference {
    pub fn new(repository: impl Into<String>, digest: Digest) -> Self {
        Self {
            repository: repository.into(),
            digest,
        }
    }
}

impl fmt::Display for CanonicalReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.digest)
    }
}

impl FromStr for CanonicalReference {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (repo, digest) = s
            .split_once('@')
            .ok_or_else(|| CoreError::InvalidDigest(s.to_string()))?;
        Ok(CanonicalReference {
            repository: repo.to_string(),
            digest: digest.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let digest = Digest::sha256(b"x");
        let r = CanonicalReference::new("library/nginx", digest);
        let s = r.to_string();
        let parsed: CanonicalReference = s.parse().unwrap();
        assert_eq!(parsed, r);
    }
}
