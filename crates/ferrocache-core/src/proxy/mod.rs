pub mod auth;
pub mod blobstore;
pub mod inflight;
pub mod manifest;
pub mod metrics;
pub mod tag;

pub use auth::{AuthChallenger, NoAuthChallenger};
pub use blobstore::ProxyBlobStore;
pub use inflight::InflightTracker;
pub use manifest::ProxyManifestStore;
pub use metrics::ProxyMetrics;
pub use tag::ProxyTagService;
