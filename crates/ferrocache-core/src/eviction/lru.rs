//! LRU eviction under a size budget. Entries are keyed by digest so a
//! blob referenced from several repositories shares one entry and one
//! footprint; evicting it removes every reference at once.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

use ferrocache_storage::StorageDriver;

use super::{EntryType, EvictionController, ExpireCallback};
use crate::digest::Digest;
use crate::error::CoreError;
use crate::reference::CanonicalReference;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Entry {
    key: String,
    entry_type: EntryType,
    references: Vec<String>,
    prev: Option<String>,
    next: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct Persisted {
    entries: HashMap<String, Entry>,
    head: Option<String>,
    tail: Option<String>,
}

struct State {
    persisted: std::sync::Mutex<Persisted>,
    dirty: AtomicBool,
    stop: Notify,
    done: Notify,
    stopped: AtomicBool,
}

pub struct LruController {
    driver: Arc<dyn StorageDriver>,
    state_path: String,
    limit: u64,
    state: Arc<State>,
    on_blob_expire: ExpireCallback,
    on_manifest_expire: ExpireCallback,
}

impl LruController {
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        state_path: impl Into<String>,
        limit: u64,
        on_blob_expire: ExpireCallback,
        on_manifest_expire: ExpireCallback,
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            state_path: state_path.into(),
            limit,
            state: Arc::new(State {
                persisted: std::sync::Mutex::new(Persisted::default()),
                dirty: AtomicBool::new(false),
                stop: Notify::new(),
                done: Notify::new(),
                stopped: AtomicBool::new(true),
            }),
            on_blob_expire,
            on_manifest_expire,
        })
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), CoreError> {
        let loaded = match self.driver.get_content(&self.state_path).await {
            Ok(bytes) => serde_json::from_slice::<Persisted>(&bytes)
                .map_err(|e| CoreError::StateCorrupt(e.to_string()))?,
            Err(e) if e.is_not_found() => Persisted::default(),
            Err(e) => return Err(CoreError::Storage(e)),
        };
        *self.state.persisted.lock().unwrap() = loaded;
        self.state.stopped.store(false, Ordering::SeqCst);

        let this = self.clone();
        tokio::spawn(async move { this.checkpoint_loop().await });
        Ok(())
    }

    async fn checkpoint_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.state.dirty.swap(false, Ordering::SeqCst) {
                        if let Err(e) = self.persist().await {
                            warn!(error = %e, "lru controller failed periodic checkpoint");
                        }
                    }
                }
                _ = self.state.stop.notified() => {
                    if let Err(e) = self.persist().await {
                        warn!(error = %e, "lru controller failed final checkpoint");
                    }
                    self.state.stopped.store(true, Ordering::SeqCst);
                    self.state.done.notify_one();
                    return;
                }
            }
        }
    }

    async fn persist(&self) -> Result<(), CoreError> {
        let snapshot = self.state.persisted.lock().unwrap().clone();
        let bytes = bytes::Bytes::from(serde_json::to_vec(&snapshot).expect("lru state serializes"));
        self.driver.put_content(&self.state_path, bytes).await?;
        Ok(())
    }

    fn unlink(persisted: &mut Persisted, key: &str) {
        let (prev, next) = {
            let entry = persisted.entries.get(key).expect("entry exists");
            (entry.prev.clone(), entry.next.clone())
        };
        match &prev {
            Some(prev_key) => persisted.entries.get_mut(prev_key).unwrap().next = next.clone(),
            None => persisted.head = next.clone(),
        }
        match &next {
            Some(next_key) => persisted.entries.get_mut(next_key).unwrap().prev = prev.clone(),
            None => persisted.tail = prev.clone(),
        }
    }

    fn append_at_tail(persisted: &mut Persisted, key: &str) {
        let old_tail = persisted.tail.clone();
        if let Some(old_tail_key) = &old_tail {
            persisted.entries.get_mut(old_tail_key).unwrap().next = Some(key.to_string());
        }
        if let Some(entry) = persisted.entries.get_mut(key) {
            entry.prev = old_tail.clone();
            entry.next = None;
        }
        persisted.tail = Some(key.to_string());
        if persisted.head.is_none() {
            persisted.head = Some(key.to_string());
        }
    }

    async fn add(&self, reference: &CanonicalReference, entry_type: EntryType) -> Result<(), CoreError> {
        let key = reference.digest.to_string();
        {
            let mut persisted = self.state.persisted.lock().unwrap();
            if persisted.entries.contains_key(&key) {
                return Err(CoreError::Inconsistency(format!(
                    "lru entry for {key} already exists; use touch"
                )));
            }
            persisted.entries.insert(
                key.clone(),
                Entry {
                    key: key.clone(),
                    entry_type,
                    references: vec![reference.repository.clone()],
                    prev: None,
                    next: None,
                },
            );
            Self::append_at_tail(&mut persisted, &key);
        }
        self.state.dirty.store(true, Ordering::SeqCst);
        self.evict().await
    }

    async fn touch(&self, reference: &CanonicalReference, entry_type: EntryType) -> Result<(), CoreError> {
        let key = reference.digest.to_string();
        {
            let mut persisted = self.state.persisted.lock().unwrap();
            let existing_type = persisted
                .entries
                .get(&key)
                .ok_or_else(|| CoreError::Inconsistency(format!("lru entry for {key} does not exist")))?
                .entry_type;
            if existing_type != entry_type {
                return Err(CoreError::Inconsistency(format!(
                    "lru entry for {key} has type {existing_type:?}, touched as {entry_type:?}"
                )));
            }
            if !persisted.entries[&key].references.contains(&reference.repository) {
                persisted
                    .entries
                    .get_mut(&key)
                    .unwrap()
                    .references
                    .push(reference.repository.clone());
            }
            if persisted.tail.as_deref() != Some(key.as_str()) {
                Self::unlink(&mut persisted, &key);
                Self::append_at_tail(&mut persisted, &key);
            }
        }
        self.state.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Current usage excluding this controller's own state file, so
    /// writing a checkpoint never triggers its own eviction loop.
    async fn usage_excluding_self(&self) -> Result<u64, CoreError> {
        let total = self.driver.usage("/").await?;
        let own = match self.driver.stat(&self.state_path).await {
            Ok(info) => info.size,
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(CoreError::Storage(e)),
        };
        Ok(total.saturating_sub(own))
    }

    async fn evict(&self) -> Result<(), CoreError> {
        loop {
            if self.usage_excluding_self().await? <= self.limit {
                return Ok(());
            }

            let candidate = {
                let persisted = self.state.persisted.lock().unwrap();
                match &persisted.head {
                    Some(key) => persisted.entries.get(key).cloned(),
                    None => None,
                }
            };

            let Some(entry) = candidate else {
                return Err(CoreError::Inconsistency(
                    "lru limit unsatisfiable: no entries left to evict".to_string(),
                ));
            };

            let digest: Digest = entry.key.parse()?;
            let callback = match entry.entry_type {
                EntryType::Blob => &self.on_blob_expire,
                EntryType::Manifest => &self.on_manifest_expire,
            };
            for repository in &entry.references {
                let reference = CanonicalReference::new(repository.clone(), digest.clone());
                callback(reference).await?;
            }

            {
                let mut persisted = self.state.persisted.lock().unwrap();
                Self::unlink(&mut persisted, &entry.key);
                persisted.entries.remove(&entry.key);
            }
            self.state.dirty.store(true, Ordering::SeqCst);
            info!(key = %entry.key, "lru entry evicted");
        }
    }
}

#[async_trait]
impl EvictionController for LruController {
    async fn register(&self, reference: &CanonicalReference, entry_type: EntryType) -> Result<(), CoreError> {
        let key = reference.digest.to_string();
        let exists = self.state.persisted.lock().unwrap().entries.contains_key(&key);
        if exists {
            self.touch(reference, entry_type).await
        } else {
            self.add(reference, entry_type).await
        }
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
    use ferrocache_storage::MemoryDriver;
    use std::sync::atomic::AtomicUsize;

    fn noop_callback() -> ExpireCallback {
        Arc::new(|_reference| Box::pin(async { Ok(()) }))
    }

    fn blob_path(digest: &Digest) -> String {
        format!("/blobs/{}/{}/{}/data", digest.algorithm(), digest.shard(), digest.hex())
    }

    /// Mirrors `ProxyingRegistry::blob_expire_callback`: a real expire
    /// callback must free the bytes it was registered for, not just
    /// observe the eviction. A callback that only counts leaves usage
    /// unchanged, so a single eviction never satisfies the limit and
    /// the controller keeps evicting until the list is empty.
    fn counting_callback(driver: Arc<dyn StorageDriver>, counter: Arc<AtomicUsize>) -> ExpireCallback {
        Arc::new(move |reference| {
            let driver = driver.clone();
            let counter = counter.clone();
            Box::pin(async move {
                driver.delete(&blob_path(&reference.digest)).await.ok();
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    async fn seed_usage(driver: &Arc<dyn StorageDriver>, digest: &Digest, size: usize) {
        driver
            .put_content(&blob_path(digest), bytes::Bytes::from(vec![0u8; size]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn add_then_touch_moves_to_tail_and_appends_reference() {
        let driver: Arc<dyn StorageDriver> = Arc::new(MemoryDriver::new());
        let controller = LruController::new(driver.clone(), "/eviction/lru-state.json", 1_000_000, noop_callback(), noop_callback());
        controller.start().await.unwrap();

        let digest = Digest::sha256(b"layer");
        seed_usage(&driver, &digest, 10).await;
        let reference_a = CanonicalReference::new("library/nginx", digest.clone());
        controller.register(&reference_a, EntryType::Blob).await.unwrap();

        let reference_b = CanonicalReference::new("library/redis", digest.clone());
        controller.register(&reference_b, EntryType::Blob).await.unwrap();

        let persisted = controller.state.persisted.lock().unwrap();
        let entry = persisted.entries.get(&digest.to_string()).unwrap();
        assert_eq!(entry.references, vec!["library/nginx".to_string(), "library/redis".to_string()]);
        assert_eq!(persisted.tail.as_deref(), Some(digest.to_string().as_str()));
    }

    #[tokio::test]
    async fn touch_on_missing_entry_fails() {
        let driver: Arc<dyn StorageDriver> = Arc::new(MemoryDriver::new());
        let controller = LruController::new(driver, "/eviction/lru-state.json", 1_000_000, noop_callback(), noop_callback());
        controller.start().await.unwrap();

        let reference = CanonicalReference::new("library/nginx", Digest::sha256(b"layer"));
        assert!(controller.touch(&reference, EntryType::Blob).await.is_err());
    }

    #[tokio::test]
    async fn evict_runs_when_usage_exceeds_limit() {
        let driver: Arc<dyn StorageDriver> = Arc::new(MemoryDriver::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let controller = LruController::new(
            driver.clone(),
            "/eviction/lru-state.json",
            15,
            counting_callback(driver.clone(), counter.clone()),
            noop_callback(),
        );
        controller.start().await.unwrap();

        let first_digest = Digest::sha256(b"first");
        seed_usage(&driver, &first_digest, 10).await;
        let first = CanonicalReference::new("library/nginx", first_digest);
        controller.register(&first, EntryType::Blob).await.unwrap();

        let second_digest = Digest::sha256(b"second");
        seed_usage(&driver, &second_digest, 10).await;
        let second = CanonicalReference::new("library/nginx", second_digest);
        controller.register(&second, EntryType::Blob).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let persisted = controller.state.persisted.lock().unwrap();
        assert_eq!(persisted.entries.len(), 1);
        assert!(persisted.entries.contains_key(&Digest::sha256(b"second").to_string()));
    }

    #[tokio::test]
    async fn unsatisfiable_limit_fails_when_list_empties() {
        let driver: Arc<dyn StorageDriver> = Arc::new(MemoryDriver::new());
        let controller = LruController::new(driver.clone(), "/eviction/lru-state.json", 1, noop_callback(), noop_callback());
        controller.start().await.unwrap();

        let digest = Digest::sha256(b"oversized");
        seed_usage(&driver, &digest, 1000).await;
        let reference = CanonicalReference::new("library/nginx", digest);
        assert!(controller.register(&reference, EntryType::Blob).await.is_err());
    }
}
