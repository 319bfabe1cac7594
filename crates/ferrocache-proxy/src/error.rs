//! Errors arising from talking to an upstream registry over HTTP.

use thiserror::Error;

use ferrocache_core::CoreError;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream not found: {0}")]
    NotFound(String),

    #[error("upstream unauthorized")]
    Unauthorized,

    #[error("upstream returned error: {status} - {message}")]
    Upstream { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("token refresh failed")]
    TokenRefreshFailed,

    #[error("credential helper failed: {0}")]
    CredentialHelper(String),
}

/// `CoreError` and `From` both live outside this crate, so the
/// conversion has to be a plain function rather than a `From` impl.
/// Callers that know which digest or tag a `NotFound` refers to should
/// construct the specific `CoreError::*Unknown` variant themselves
/// instead of going through this generic fallback.
pub fn map_to_core(err: ProxyError) -> CoreError {
    CoreError::Upstream(err.to_string())
}
