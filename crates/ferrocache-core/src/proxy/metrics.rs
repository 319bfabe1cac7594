//! Per-kind pull-through counters. These are the raw numbers a future
//! exporter would surface; this crate only accumulates them.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counters {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    bytes_pulled: AtomicU64,
    bytes_pushed: AtomicU64,
}

impl Counters {
    pub fn record_hit(&self, bytes_pushed: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.bytes_pushed.fetch_add(bytes_pushed, Ordering::Relaxed);
    }

    pub fn record_miss(&self, bytes_pulled: u64, bytes_pushed: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.bytes_pulled.fetch_add(bytes_pulled, Ordering::Relaxed);
        self.bytes_pushed.fetch_add(bytes_pushed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bytes_pulled: self.bytes_pulled.load(Ordering::Relaxed),
            bytes_pushed: self.bytes_pushed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub bytes_pulled: u64,
    pub bytes_pushed: u64,
}

/// Separate counter sets for blobs, manifests, and tags — each caller
/// increments only the set matching its own artifact kind.
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    pub blobs: Counters,
    pub manifests: Counters,
    pub tags: Counters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hits_and_misses_partition_requests() {
        let counters = Counters::default();
        counters.record_hit(100);
        counters.record_miss(50, 50);
        counters.record_miss(10, 10);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.requests, 3);
        assert_eq!(snapshot.hits + snapshot.misses, snapshot.requests);
        assert_eq!(snapshot.bytes_pulled, 60);
        assert_eq!(snapshot.bytes_pushed, 160);
    }
}
