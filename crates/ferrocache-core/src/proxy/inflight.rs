//! Process-wide in-flight digest tracking for pull-once/serve-many
//! semantics: at most one cache-populating fetch per digest runs at a
//! time, and it is this set that arbitrates the race.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::digest::Digest;

/// A guard that removes its digest from the set on drop, regardless of
/// how the holder's scope is exited (success, error, or panic).
pub struct InflightGuard {
    set: Arc<Mutex<HashSet<Digest>>>,
    digest: Digest,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.digest);
    }
}

#[derive(Clone, Default)]
pub struct InflightTracker {
    set: Arc<Mutex<HashSet<Digest>>>,
}

impl InflightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to claim `digest` for cache population. Returns `Some`
    /// guard (release-on-drop) if this caller is now the sole fetcher;
    /// `None` if another fetch for the same digest is already running,
    /// in which case the caller must stream directly from upstream
    /// instead of populating local storage itself.
    pub fn try_claim(&self, digest: &Digest) -> Option<InflightGuard> {
        let mut set = self.set.lock();
        if set.contains(digest) {
            return None;
        }
        set.insert(digest.clone());
        Some(InflightGuard {
            set: self.set.clone(),
            digest: digest.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_fails_while_first_holds_guard() {
        let tracker = InflightTracker::new();
        let digest = Digest::sha256(b"layer");

        let guard = tracker.try_claim(&digest);
        assert!(guard.is_some());
        assert!(tracker.try_claim(&digest).is_none());

        drop(guard);
        assert!(tracker.try_claim(&digest).is_some());
    }

    #[test]
    fn distinct_digests_claim_independently() {
        let tracker = InflightTracker::new();
        let a = Digest::sha256(b"a");
        let b = Digest::sha256(b"b");
        let _guard_a = tracker.try_claim(&a).unwrap();
        assert!(tracker.try_claim(&b).is_some());
    }
}
