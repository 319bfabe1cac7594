//! Upstream registry proxy: authentication challenges, credential
//! sourcing, and the HTTP-backed `BlobStore`/`ManifestService`/
//! `TagService` implementations that let `ferrocache-core` pull
//! through a real container registry.

pub mod auth;
pub mod backend;
pub mod blobstore;
pub mod challenge;
pub mod client;
pub mod credentials;
pub mod error;
pub mod manifest;
pub mod tag;

pub use backend::RemoteRegistryBackend;
pub use client::RemoteClient;
pub use credentials::{Credential, CredentialStore, ExecCredentialStore, StaticCredentialStore};
pub use error::ProxyError;
