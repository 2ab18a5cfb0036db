//! Write batches.
//!
//! A batch is an atomic group of mutations across one or more key ranges.
//! Mutations are buffered in a RocksDB `WriteBatch`; per-range statistic
//! deltas are recorded against the batch id and folded into the range
//! aggregates only after the leaf commit succeeds.

use crate::error::EngineResult;
use crate::leaf::Leaf;
use crate::range::KeyRange;
use crate::range_util::upper_bound;
use bytes::Bytes;
use rocksdb::WriteBatch;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) struct Batch {
    id: u64,
    inner: WriteBatch,
    ranges: HashMap<u64, Arc<KeyRange>>,
}

impl Batch {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            inner: WriteBatch::default(),
            ranges: HashMap::new(),
        }
    }

    /// Number of buffered leaf mutations.
    pub(crate) fn count(&self) -> usize {
        self.inner.len()
    }

    fn touch(&mut self, range: &Arc<KeyRange>) {
        self.ranges
            .entry(range.id())
            .or_insert_with(|| range.clone());
    }

    /// Buffer a put as delete-then-put of the same key, which lets the leaf
    /// store reclaim stacked versions of hot keys during compaction.
    pub(crate) fn put(
        &mut self,
        leaf: &Leaf,
        range: &Arc<KeyRange>,
        key: &[u8],
        value: &[u8],
    ) -> EngineResult<()> {
        self.touch(range);
        let cf = leaf.cf(range.namespace())?;
        self.inner.delete_cf(cf, key);
        self.inner.put_cf(cf, key, value);
        range.record_put(self.id);
        Ok(())
    }

    /// Buffer an insert of a key the caller promises is absent.
    pub(crate) fn insert(
        &mut self,
        leaf: &Leaf,
        range: &Arc<KeyRange>,
        key: &[u8],
        value: &[u8],
    ) -> EngineResult<()> {
        self.touch(range);
        self.inner.put_cf(leaf.cf(range.namespace())?, key, value);
        range.record_insert(self.id);
        Ok(())
    }

    /// Buffer a point delete.
    pub(crate) fn delete(
        &mut self,
        leaf: &Leaf,
        range: &Arc<KeyRange>,
        key: &[u8],
    ) -> EngineResult<()> {
        self.touch(range);
        self.inner.delete_cf(leaf.cf(range.namespace())?, key);
        range.record_delete(self.id);
        Ok(())
    }

    /// Buffer a range delete. A missing endpoint is resolved against the
    /// current store content; if the range holds no keys the delete becomes
    /// a no-op and records nothing.
    pub(crate) fn delete_range(
        &mut self,
        leaf: &Leaf,
        range: &Arc<KeyRange>,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> EngineResult<()> {
        self.touch(range);
        let mut start = start.map(Bytes::copy_from_slice);
        let mut end = end.map(Bytes::copy_from_slice);
        if start.is_none() || end.is_none() {
            let mut it = leaf.iterator(range.namespace(), start.as_deref(), end.as_deref())?;
            if start.is_none() {
                it.seek_to_first();
                if it.is_valid() {
                    start = it.key().map(Bytes::copy_from_slice);
                }
            }
            if end.is_none() {
                it.seek_to_last();
                if it.is_valid() {
                    end = it.key().map(upper_bound);
                }
            }
        }
        if let (Some(start), Some(end)) = (start, end) {
            self.inner
                .delete_range_cf(leaf.cf(range.namespace())?, start, end);
            range.record_delete_range(self.id);
        }
        Ok(())
    }

    /// Ranges touched by this batch.
    pub(crate) fn touched(&self) -> impl Iterator<Item = &Arc<KeyRange>> {
        self.ranges.values()
    }

    /// Consume the batch for commit, yielding the raw write batch and the
    /// touched ranges.
    pub(crate) fn into_parts(self) -> (WriteBatch, Vec<Arc<KeyRange>>) {
        (self.inner, self.ranges.into_values().collect())
    }
}
