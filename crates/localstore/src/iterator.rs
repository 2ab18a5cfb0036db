//! Engine iterators.
//!
//! [`LeafIterator`] is a thin wrapper over a raw RocksDB iterator with fixed
//! bounds. [`EngineIterator`] adds seek latency tracking on top: the last
//! ten seek durations feed a rolling average, and a range compaction hint is
//! submitted whenever the smoothed latency crosses the threshold.

use crate::engine::Shared;
use crate::metrics;
use bytes::Bytes;
use rocksdb::{ColumnFamily, DBRawIterator, ReadOptions, DB};
use std::time::Instant;

/// Smoothed seek latency above which a scan nominates its range for
/// compaction, in nanoseconds.
const SEEK_LATENCY_LIMIT_NS: u64 = 10_000_000;

/// Number of seek latency samples kept in the rolling window.
const LATENCY_WINDOW: usize = 10;

/// Bounded iterator over one namespace of a leaf store.
pub struct LeafIterator<'a> {
    db: &'a DB,
    cf: &'a ColumnFamily,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
    inner: DBRawIterator<'a>,
}

impl<'a> LeafIterator<'a> {
    pub(crate) fn new(
        db: &'a DB,
        cf: &'a ColumnFamily,
        lower: Option<Vec<u8>>,
        upper: Option<Vec<u8>>,
    ) -> Self {
        let inner = raw_iterator(db, cf, &lower, &upper);
        Self {
            db,
            cf,
            lower,
            upper,
            inner,
        }
    }

    pub fn seek_to_first(&mut self) {
        self.inner.seek_to_first();
    }

    pub fn seek_to_last(&mut self) {
        self.inner.seek_to_last();
    }

    /// Position at the first key at or after `target`.
    pub fn seek(&mut self, target: &[u8]) {
        self.inner.seek(target);
    }

    /// Position at the last key at or before `target`.
    pub fn seek_for_prev(&mut self, target: &[u8]) {
        self.inner.seek_for_prev(target);
    }

    pub fn next(&mut self) {
        self.inner.next();
    }

    pub fn prev(&mut self) {
        self.inner.prev();
    }

    pub fn is_valid(&self) -> bool {
        self.inner.valid()
    }

    /// Key at the cursor; `None` when the iterator is not valid.
    pub fn key(&self) -> Option<&[u8]> {
        self.inner.key()
    }

    /// Value at the cursor; `None` when the iterator is not valid.
    pub fn value(&self) -> Option<&[u8]> {
        self.inner.value()
    }

    /// Recreate the underlying iterator so it observes writes committed
    /// after it was opened. The cursor position is reset.
    pub fn refresh(&mut self) {
        self.inner = raw_iterator(self.db, self.cf, &self.lower, &self.upper);
    }
}

fn raw_iterator<'a>(
    db: &'a DB,
    cf: &'a ColumnFamily,
    lower: &Option<Vec<u8>>,
    upper: &Option<Vec<u8>>,
) -> DBRawIterator<'a> {
    let mut opts = ReadOptions::default();
    if let Some(lower) = lower {
        opts.set_iterate_lower_bound(lower.clone());
    }
    if let Some(upper) = upper {
        opts.set_iterate_upper_bound(upper.clone());
    }
    db.raw_iterator_cf_opt(cf, opts)
}

/// Rolling window over the most recent seek latencies.
#[derive(Default)]
pub(crate) struct LatencyWindow {
    window: [u64; LATENCY_WINDOW],
    count: u64,
    total: u64,
}

impl LatencyWindow {
    /// Record one latency sample and return the smoothed average over the
    /// last up-to-ten samples.
    pub(crate) fn record(&mut self, latency_ns: u64) -> u64 {
        let idx = (self.count % LATENCY_WINDOW as u64) as usize;
        self.count += 1;
        self.total = self.total + latency_ns - self.window[idx];
        self.window[idx] = latency_ns;
        self.total / self.count.min(LATENCY_WINDOW as u64)
    }

    pub(crate) fn over_limit(estimate_ns: u64) -> bool {
        estimate_ns > SEEK_LATENCY_LIMIT_NS
    }
}

/// Latency-aware iterator over the live store.
///
/// Every seek operation is measured; `next`/`prev`/`key`/`value` are not.
pub struct EngineIterator<'a> {
    inner: LeafIterator<'a>,
    shared: &'a Shared,
    ns: String,
    start: Option<Bytes>,
    end: Option<Bytes>,
    window: LatencyWindow,
}

impl<'a> EngineIterator<'a> {
    pub(crate) fn new(
        inner: LeafIterator<'a>,
        shared: &'a Shared,
        ns: String,
        start: Option<Bytes>,
        end: Option<Bytes>,
    ) -> Self {
        Self {
            inner,
            shared,
            ns,
            start,
            end,
            window: LatencyWindow::default(),
        }
    }

    pub fn seek_to_first(&mut self) {
        let begin = Instant::now();
        self.inner.seek_to_first();
        self.measured(begin);
    }

    pub fn seek_to_last(&mut self) {
        let begin = Instant::now();
        self.inner.seek_to_last();
        self.measured(begin);
    }

    /// Position at the first key at or after `target`.
    pub fn seek(&mut self, target: &[u8]) {
        let begin = Instant::now();
        self.inner.seek(target);
        self.measured(begin);
    }

    /// Position at the last key at or before `target`.
    pub fn seek_for_prev(&mut self, target: &[u8]) {
        let begin = Instant::now();
        self.inner.seek_for_prev(target);
        self.measured(begin);
    }

    pub fn next(&mut self) {
        self.inner.next();
    }

    pub fn prev(&mut self) {
        self.inner.prev();
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.inner.key()
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.inner.value()
    }

    pub fn refresh(&mut self) {
        self.inner.refresh();
    }

    fn measured(&mut self, begin: Instant) {
        let estimate = self.window.record(begin.elapsed().as_nanos() as u64);
        metrics::record_iter_latency(estimate);
        if LatencyWindow::over_limit(estimate) {
            self.shared
                .submit_hint(&self.ns, self.start.clone(), self.end.clone());
        }
    }
}
