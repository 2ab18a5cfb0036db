//! Key ranges and their write statistics.
//!
//! A key range is a logical half-open `[start, end)` cursor over one
//! namespace. Ranges are not partitions of storage: many overlapping ranges
//! may address the same namespace. Each range tracks how many live keys,
//! tombstones and range deletes the batches routed through it have
//! committed, and nominates its own slice for compaction once tombstone
//! pressure crosses the configured thresholds.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thresholds for the tombstone-pressure compaction trigger.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CompactionTrigger {
    pub(crate) min_tombstone_keys: u64,
    pub(crate) tombstone_percent: f64,
}

/// Per-batch statistic deltas, folded into the range aggregates only when
/// the batch commits.
#[derive(Default)]
struct BatchDeltas {
    puts: AtomicU64,
    tombstones: AtomicU64,
    delete_ranges: AtomicU64,
}

/// Statistics cursor over `[start, end)` within one namespace.
pub struct KeyRange {
    id: u64,
    ns: String,
    start: Option<Bytes>,
    end: Option<Bytes>,
    key_count: AtomicU64,
    tombstone_count: AtomicU64,
    delete_range_count: AtomicU64,
    batches: DashMap<u64, BatchDeltas>,
}

impl KeyRange {
    pub(crate) fn new(id: u64, ns: String, start: Option<Bytes>, end: Option<Bytes>) -> Self {
        Self {
            id,
            ns,
            start,
            end,
            key_count: AtomicU64::new(0),
            tombstone_count: AtomicU64::new(0),
            delete_range_count: AtomicU64::new(0),
            batches: DashMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn namespace(&self) -> &str {
        &self.ns
    }

    /// Lower bound; `None` means unbounded below.
    pub fn start(&self) -> Option<&Bytes> {
        self.start.as_ref()
    }

    /// Upper bound; `None` means unbounded above.
    pub fn end(&self) -> Option<&Bytes> {
        self.end.as_ref()
    }

    /// Committed inserts and puts since the last trigger reset.
    pub fn key_count(&self) -> u64 {
        self.key_count.load(Ordering::Acquire)
    }

    /// Committed point deletes and over-writes since the last trigger reset.
    pub fn tombstone_count(&self) -> u64 {
        self.tombstone_count.load(Ordering::Acquire)
    }

    /// Committed range deletes since the last trigger reset.
    pub fn delete_range_count(&self) -> u64 {
        self.delete_range_count.load(Ordering::Acquire)
    }

    // A put rewrites the key: it both adds a live key and buries the old
    // version, so it counts in both columns.
    pub(crate) fn record_put(&self, batch_id: u64) {
        let deltas = self.batches.entry(batch_id).or_default();
        deltas.puts.fetch_add(1, Ordering::Relaxed);
        deltas.tombstones.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self, batch_id: u64) {
        let deltas = self.batches.entry(batch_id).or_default();
        deltas.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self, batch_id: u64) {
        let deltas = self.batches.entry(batch_id).or_default();
        deltas.tombstones.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete_range(&self, batch_id: u64) {
        let deltas = self.batches.entry(batch_id).or_default();
        deltas.delete_ranges.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold the batch's deltas into the aggregates and evaluate the
    /// compaction trigger. Returns true when the range should submit a hint
    /// for its own `[start, end)`; the counters are reset in that case so
    /// the trigger cannot re-arm until new batches accrue.
    pub(crate) fn end_batch(&self, batch_id: u64, trigger: &CompactionTrigger) -> bool {
        if let Some((_, deltas)) = self.batches.remove(&batch_id) {
            self.key_count
                .fetch_add(deltas.puts.load(Ordering::Relaxed), Ordering::AcqRel);
            self.tombstone_count
                .fetch_add(deltas.tombstones.load(Ordering::Relaxed), Ordering::AcqRel);
            self.delete_range_count
                .fetch_add(deltas.delete_ranges.load(Ordering::Relaxed), Ordering::AcqRel);
        }
        self.compact_if_needed(trigger)
    }

    /// Drop the batch's deltas; aborted batches contribute nothing.
    pub(crate) fn abort_batch(&self, batch_id: u64) {
        self.batches.remove(&batch_id);
    }

    fn compact_if_needed(&self, trigger: &CompactionTrigger) -> bool {
        let tombstones = self.tombstone_count.load(Ordering::Acquire);
        let keys = self.key_count.load(Ordering::Acquire);
        let delete_ranges = self.delete_range_count.load(Ordering::Acquire);
        let fire = delete_ranges > 0
            || (tombstones > trigger.min_tombstone_keys
                && tombstones as f64 / (tombstones + keys) as f64 >= trigger.tombstone_percent);
        if fire {
            self.tombstone_count.store(0, Ordering::Release);
            self.key_count.store(0, Ordering::Release);
            self.delete_range_count.store(0, Ordering::Release);
        }
        fire
    }
}
