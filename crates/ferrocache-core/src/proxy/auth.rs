//! The upstream authentication seam. Concrete implementations (static
//! credentials, exec credential helpers, challenge caching) live in the
//! crate that owns the HTTP client, since establishing a challenge is
//! inseparable from actually speaking the wire protocol.

use async_trait::async_trait;

use crate::error::CoreError;

/// Ensures authentication challenges for one upstream root are cached
/// before a proxy store issues a remote request. Implementations must
/// make repeated calls cheap — the first call pings and caches, every
/// subsequent call is expected to be a cache hit.
#[async_trait]
pub trait AuthChallenger: Send + Sync {
    async fn try_establish(&self) -> Result<(), CoreError>;
}

/// A challenger for upstreams that need no authentication at all.
pub struct NoAuthChallenger;

#[async_trait]
impl AuthChallenger for NoAuthChallenger {
    async fn try_establish(&self) -> Result<(), CoreError> {
        Ok(())
    }
}
