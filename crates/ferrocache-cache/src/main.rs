//! ferrocache-cache — wires the pull-through core up to a real
//! upstream registry and a local disk-backed store.
//!
//! The HTTP/v2 registry API surface that would actually dispatch
//! client requests into this registry is explicitly out of scope
//! (it's the external collaborator described in the core's own
//! specification); this binary's job ends at constructing a working
//! `ProxyingRegistry` and keeping its eviction controller running
//! until told to stop.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::Config;
use ferrocache_core::config::EvictionPolicyConfig;
use ferrocache_core::eviction::lru::LruController;
use ferrocache_core::eviction::ttl::TtlScheduler;
use ferrocache_core::eviction::EvictionController;
use ferrocache_core::registry::ProxyingRegistry;
use ferrocache_proxy::credentials::{CredentialStore, ExecCredentialStore, StaticCredentialStore};
use ferrocache_proxy::RemoteRegistryBackend;
use ferrocache_storage::{FsDriver, StorageDriver};

/// ferrocache-cache: pull-through caching proxy core
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    init_logging(&config.logging.level);

    info!("starting ferrocache-cache v{}", env!("CARGO_PKG_VERSION"));

    config.proxy.validate().context("invalid proxy configuration")?;

    let driver: Arc<dyn StorageDriver> = Arc::new(
        FsDriver::new(&config.storage.root)
            .await
            .context("failed to initialize storage driver")?,
    );

    let credentials = build_credential_store(&config.proxy);
    let root_url = url::Url::parse(&config.proxy.remote_url).context("invalid remoteurl")?;
    let remote = Arc::new(
        RemoteRegistryBackend::new(root_url, credentials).context("failed to construct upstream client")?,
    );

    let scheduler = build_eviction_controller(&config, driver.clone()).await?;

    let _registry = ProxyingRegistry::new(driver, remote, scheduler.clone());

    info!(remote = %config.proxy.remote_url, "registry ready");

    shutdown_signal().await;
    info!("shutdown signal received");

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    Ok(())
}

fn build_credential_store(proxy: &ferrocache_core::config::ProxyConfig) -> Arc<dyn CredentialStore> {
    if let Some(exec) = &proxy.exec {
        if !exec.command.is_empty() {
            return Arc::new(ExecCredentialStore::new(exec.command.clone(), exec.lifetime));
        }
    }
    let host = url::Url::parse(&proxy.remote_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    Arc::new(StaticCredentialStore::new(
        host,
        proxy.username.clone().unwrap_or_default(),
        proxy.password.clone().unwrap_or_default(),
    ))
}

async fn build_eviction_controller(
    config: &Config,
    driver: Arc<dyn StorageDriver>,
) -> Result<Option<Arc<dyn EvictionController>>> {
    match config.proxy.resolved_eviction_policy() {
        EvictionPolicyConfig::None => Ok(None),
        EvictionPolicyConfig::Ttl { ttl } => {
            let scheduler = TtlScheduler::new(
                driver.clone(),
                "/scheduler-state.json".to_string(),
                ttl,
                ProxyingRegistry::blob_expire_callback(driver.clone()),
                ProxyingRegistry::manifest_expire_callback(driver),
            );
            scheduler.start().await.context("failed to start ttl scheduler")?;
            info!(ttl = ?ttl, "ttl eviction scheduler started");
            Ok(Some(scheduler as Arc<dyn EvictionController>))
        }
        EvictionPolicyConfig::Lru { limit } => {
            let controller = LruController::new(
                driver.clone(),
                "/eviction-state.json".to_string(),
                limit,
                ProxyingRegistry::blob_expire_callback(driver.clone()),
                ProxyingRegistry::manifest_expire_callback(driver),
            );
            controller.start().await.context("failed to start lru controller")?;
            info!(limit, "lru eviction controller started");
            Ok(Some(controller as Arc<dyn EvictionController>))
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
}
