//! Run-wide harvest counters
//!
//! One [`HarvestMetrics`] is shared by the pool, its workers and the progress
//! reporter. Harvest logic only ever writes to it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct HarvestMetrics {
    records_indexed: AtomicU64,
    shards_completed: AtomicU64,
    shards_failed: AtomicU64,
    active_shards: Mutex<BTreeSet<i64>>,
}

/// Point-in-time copy of [`HarvestMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_indexed: u64,
    pub shards_completed: u64,
    pub shards_failed: u64,
    pub active_shards: Vec<i64>,
}

impl HarvestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count records the sink accepted.
    pub fn add_indexed(&self, count: u64) {
        self.records_indexed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn shard_started(&self, shard_id: i64) {
        self.active().insert(shard_id);
    }

    pub fn shard_succeeded(&self, shard_id: i64) {
        self.active().remove(&shard_id);
        self.shards_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn shard_failed(&self, shard_id: i64) {
        self.active().remove(&shard_id);
        self.shards_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_indexed(&self) -> u64 {
        self.records_indexed.load(Ordering::Relaxed)
    }

    pub fn shards_failed(&self) -> u64 {
        self.shards_failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_indexed: self.records_indexed(),
            shards_completed: self.shards_completed.load(Ordering::Relaxed),
            shards_failed: self.shards_failed(),
            active_shards: self.active().iter().copied().collect(),
        }
    }

    fn active(&self) -> std::sync::MutexGuard<'_, BTreeSet<i64>> {
        // counters stay usable even if a holder panicked
        self.active_shards
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
