//! TTL-based eviction: every cached artifact is deleted a fixed
//! duration after it was last registered.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

use ferrocache_storage::StorageDriver;

use super::{EntryType, EvictionController, ExpireCallback};
use crate::error::CoreError;
use crate::reference::CanonicalReference;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Entry {
    key: String,
    expiry: DateTime<Utc>,
    entry_type: EntryType,
}

struct State {
    entries: std::sync::Mutex<HashMap<String, Entry>>,
    wake: Notify,
    stop: Notify,
    done: Notify,
    stopped: AtomicBool,
}

/// Persists `{entries}` as JSON to `pathToStateFile`; survives restart
/// by reloading it on `start`. Entries already past expiry when loaded
/// fire immediately.
pub struct TtlScheduler {
    driver: Arc<dyn StorageDriver>,
    state_path: String,
    ttl: ChronoDuration,
    state: Arc<State>,
    on_blob_expire: ExpireCallback,
    on_manifest_expire: ExpireCallback,
}

impl TtlScheduler {
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        state_path: impl Into<String>,
        ttl: std::time::Duration,
        on_blob_expire: ExpireCallback,
        on_manifest_expire: ExpireCallback,
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            state_path: state_path.into(),
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::zero()),
            state: Arc::new(State {
                entries: std::sync::Mutex::new(HashMap::new()),
                wake: Notify::new(),
                stop: Notify::new(),
                done: Notify::new(),
                stopped: AtomicBool::new(true),
            }),
            on_blob_expire,
            on_manifest_expire,
        })
    }

    /// Load persisted state and spawn the mainloop.
    pub async fn start(self: &Arc<Self>) -> Result<(), CoreError> {
        let loaded = match self.driver.get_content(&self.state_path).await {
            Ok(bytes) => serde_json::from_slice::<HashMap<String, Entry>>(&bytes)
                .map_err(|e| CoreError::StateCorrupt(e.to_string()))?,
            Err(e) if e.is_not_found() => HashMap::new(),
            Err(e) => return Err(CoreError::Storage(e)),
        };
        *self.state.entries.lock().unwrap() = loaded;
        self.state.stopped.store(false, Ordering::SeqCst);

        let this = self.clone();
        tokio::spawn(async move { this.mainloop().await });
        Ok(())
    }

    async fn persist(&self) -> Result<(), CoreError> {
        let snapshot = self.state.entries.lock().unwrap().clone();
        let bytes = bytes::Bytes::from(
            serde_json::to_vec(&snapshot).expect("ttl entries serialize"),
        );
        self.driver.put_content(&self.state_path, bytes).await?;
        Ok(())
    }

    fn soonest(&self) -> Option<(String, DateTime<Utc>)> {
        self.state
            .entries
            .lock()
            .unwrap()
            .iter()
            .min_by_key(|(_, e)| e.expiry)
            .map(|(k, e)| (k.clone(), e.expiry))
    }

    async fn mainloop(self: Arc<Self>) {
        loop {
            let next = self.soonest();
            let sleep = match next {
                Some((_, expiry)) => {
                    let delta = expiry - Utc::now();
                    tokio::time::sleep(delta.to_std().unwrap_or(std::time::Duration::ZERO))
                }
                None => tokio::time::sleep(std::time::Duration::from_secs(3600)),
            };

            tokio::select! {
                _ = sleep, if next.is_some() => {
                    if let Some((key, _)) = next {
                        self.expire_one(&key).await;
                    }
                }
                _ = self.state.wake.notified() => continue,
                _ = self.state.stop.notified() => {
                    if let Err(e) = self.persist().await {
                        warn!(error = %e, "ttl scheduler failed final persist");
                    }
                    self.state.stopped.store(true, Ordering::SeqCst);
                    self.state.done.notify_one();
                    return;
                }
            }
        }
    }

    async fn expire_one(&self, key: &str) {
        let entry = { self.state.entries.lock().unwrap().get(key).cloned() };
        let Some(entry) = entry else { return };

        let reference: Result<CanonicalReference, _> = entry.key.parse();
        let callback_result = match reference {
            Ok(reference) => {
                let callback = match entry.entry_type {
                    EntryType::Blob => &self.on_blob_expire,
                    EntryType::Manifest => &self.on_manifest_expire,
                };
                callback(reference).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = callback_result {
            warn!(key = %entry.key, error = %e, "ttl expire callback failed");
        } else {
            info!(key = %entry.key, "ttl entry expired");
        }

        self.state.entries.lock().unwrap().remove(key);
        if let Err(e) = self.persist().await {
            warn!(error = %e, "ttl scheduler failed to persist after expiry");
        }
    }
}

#[async_trait]
impl EvictionController for TtlScheduler {
    async fn register(&self, reference: &CanonicalReference, entry_type: EntryType) -> Result<(), CoreError> {
        let key = reference.to_string();
        let expiry = Utc::now() + self.ttl;
        self.state.entries.lock().unwrap().insert(
            key.clone(),
            Entry {
                key,
                expiry,
                entry_type,
            },
        );
        self.persist().await?;
        self.state.wake.notify_one();
        Ok(())
    }

    async fn stop(&self) {
        if self.state.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.state.stop.notify_one();
        self.state.done.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;
    use ferrocache_storage::MemoryDriver;
    use std::sync::atomic::AtomicUsize;

    fn noop_callback() -> ExpireCallback {
        Arc::new(|_reference| Box::pin(async { Ok(()) }))
    }

    fn counting_callback(counter: Arc<AtomicUsize>) -> ExpireCallback {
        Arc::new(move |_reference| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn register_persists_state() {
        let driver: Arc<dyn StorageDriver> = Arc::new(MemoryDriver::new());
        let scheduler = TtlScheduler::new(
            driver.clone(),
            "/eviction/ttl-state.json",
            std::time::Duration::from_secs(3600),
            noop_callback(),
            noop_callback(),
        );
        scheduler.start().await.unwrap();

        let reference = CanonicalReference::new("library/nginx", Digest::sha256(b"layer"));
        scheduler.register(&reference, EntryType::Blob).await.unwrap();

        let persisted = driver.get_content("/eviction/ttl-state.json").await.unwrap();
        let entries: HashMap<String, Entry> = serde_json::from_slice(&persisted).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key(&reference.to_string()));

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn restart_loads_persisted_entries() {
        let driver: Arc<dyn StorageDriver> = Arc::new(MemoryDriver::new());
        let reference = CanonicalReference::new("library/nginx", Digest::sha256(b"layer"));
        let mut seed = HashMap::new();
        seed.insert(
            reference.to_string(),
            Entry {
                key: reference.to_string(),
                expiry: Utc::now() + ChronoDuration::hours(1),
                entry_type: EntryType::Blob,
            },
        );
        driver
            .put_content(
                "/eviction/ttl-state.json",
                bytes::Bytes::from(serde_json::to_vec(&seed).unwrap()),
            )
            .await
            .unwrap();

        let scheduler = TtlScheduler::new(
            driver,
            "/eviction/ttl-state.json",
            std::time::Duration::from_secs(3600),
            noop_callback(),
            noop_callback(),
        );
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.state.entries.lock().unwrap().len(), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn already_expired_entry_fires_on_load() {
        let driver: Arc<dyn StorageDriver> = Arc::new(MemoryDriver::new());
        let reference = CanonicalReference::new("library/nginx", Digest::sha256(b"layer"));
        let mut seed = HashMap::new();
        seed.insert(
            reference.to_string(),
            Entry {
                key: reference.to_string(),
                expiry: Utc::now() - ChronoDuration::hours(1),
                entry_type: EntryType::Blob,
            },
        );
        driver
            .put_content(
                "/eviction/ttl-state.json",
                bytes::Bytes::from(serde_json::to_vec(&seed).unwrap()),
            )
            .await
            .unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = TtlScheduler::new(
            driver,
            "/eviction/ttl-state.json",
            std::time::Duration::from_secs(3600),
            counting_callback(counter.clone()),
            noop_callback(),
        );
        scheduler.start().await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        scheduler.stop().await;
    }
}
