//! Leaf store adapter over RocksDB.
//!
//! This is the narrow capability surface the rest of the engine relies on:
//! open, per-namespace handles (one column family per namespace, `default`
//! first), point get, range iterator, atomic batch write, approximate size,
//! manual range compaction, flush, checkpoint creation and read-only open
//! of a checkpoint directory. Everything above this module is agnostic of
//! how the leaf stores bytes.

use crate::config::DbTuning;
use crate::error::{EngineError, EngineResult};
use crate::iterator::LeafIterator;
use crate::range_util::upper_bound;
use bytes::Bytes;
use rocksdb::checkpoint::Checkpoint;
use rocksdb::{
    BottommostLevelCompaction, ColumnFamily, ColumnFamilyDescriptor, CompactOptions,
    DBCompressionType, FlushOptions, Options, Range as DbRange, WriteBatch, WriteOptions, DB,
};
use std::path::Path;

/// The mandatory namespace. It is always first in any ordered enumeration
/// so that column family handles line up between live and checkpoint opens.
pub const DEFAULT_NS: &str = "default";

/// Handle to the underlying RocksDB instance, one column family per
/// namespace.
pub struct Leaf {
    db: DB,
    namespaces: Vec<String>,
    write_opts: WriteOptions,
}

impl Leaf {
    /// Open (or create) the store at `dir`. `namespaces` must already be
    /// ordered with [`DEFAULT_NS`] first.
    pub fn open(
        dir: &Path,
        namespaces: &[String],
        tuning: &DbTuning,
        disable_wal: bool,
    ) -> EngineResult<Self> {
        let opts = db_options(tuning);
        let db = DB::open_cf_descriptors(&opts, dir, cf_descriptors(namespaces, tuning))
            .map_err(|e| EngineError::storage("failed to open store", e))?;
        let mut write_opts = WriteOptions::default();
        write_opts.disable_wal(disable_wal);
        Ok(Self {
            db,
            namespaces: namespaces.to_vec(),
            write_opts,
        })
    }

    /// Open a read-only view over a checkpoint directory, with the same
    /// namespace order as the live store.
    pub fn open_read_only(
        dir: &Path,
        namespaces: &[String],
        tuning: &DbTuning,
    ) -> EngineResult<Self> {
        let opts = db_options(tuning);
        let db =
            DB::open_cf_descriptors_read_only(&opts, dir, cf_descriptors(namespaces, tuning), false)
                .map_err(|e| EngineError::storage("failed to open checkpoint", e))?;
        Ok(Self {
            db,
            namespaces: namespaces.to_vec(),
            write_opts: WriteOptions::default(),
        })
    }

    /// Ordered namespace set, `default` first.
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub(crate) fn cf(&self, ns: &str) -> EngineResult<&ColumnFamily> {
        self.db
            .cf_handle(ns)
            .ok_or_else(|| EngineError::UnknownNamespace(ns.to_string()))
    }

    /// Point lookup.
    pub fn get(&self, ns: &str, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        self.db
            .get_cf(self.cf(ns)?, key)
            .map_err(|e| EngineError::storage("get failed", e))
    }

    /// Bloom-filter existence check; may report true for absent keys.
    pub fn may_exist(&self, ns: &str, key: &[u8]) -> EngineResult<bool> {
        Ok(self.db.key_may_exist_cf(self.cf(ns)?, key))
    }

    /// Range iterator over `[lower, upper)`; a missing bound is unbounded.
    pub fn iterator(
        &self,
        ns: &str,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> EngineResult<LeafIterator<'_>> {
        Ok(LeafIterator::new(
            &self.db,
            self.cf(ns)?,
            lower.map(<[u8]>::to_vec),
            upper.map(<[u8]>::to_vec),
        ))
    }

    /// Atomically apply a write batch.
    pub fn write(&self, batch: WriteBatch) -> EngineResult<()> {
        self.db
            .write_opt(batch, &self.write_opts)
            .map_err(|e| EngineError::storage("batch commit failed", e))
    }

    /// Approximate size of `[start, end)`, memtable and file contributions
    /// included. A missing end bound is resolved to just past the last key
    /// currently in the range.
    pub fn ranged_size(
        &self,
        ns: &str,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> EngineResult<u64> {
        let lower: &[u8] = start.unwrap_or(&[]);
        let upper = match end {
            Some(end) => Bytes::copy_from_slice(end),
            None => self.least_upper_bound(ns, start, None)?,
        };
        if lower < upper.as_ref() {
            let sizes = self
                .db
                .get_approximate_sizes_cf(self.cf(ns)?, &[DbRange::new(lower, upper.as_ref())]);
            Ok(sizes.first().copied().unwrap_or(0))
        } else {
            Ok(0)
        }
    }

    /// Smallest bound just past the last key in `[lower, upper)`, or the
    /// empty byte string when the range holds no keys.
    pub fn least_upper_bound(
        &self,
        ns: &str,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> EngineResult<Bytes> {
        let mut it = self.iterator(ns, lower, upper)?;
        it.seek_to_last();
        if it.is_valid() {
            if let Some(key) = it.key() {
                return Ok(upper_bound(key));
            }
        }
        Ok(Bytes::new())
    }

    /// Synchronously compact `[start, end)` of a namespace; the bottommost
    /// level is skipped.
    pub fn compact_range(
        &self,
        ns: &str,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> EngineResult<()> {
        let mut opts = CompactOptions::default();
        opts.set_bottommost_level_compaction(BottommostLevelCompaction::Skip);
        self.db.compact_range_cf_opt(self.cf(ns)?, start, end, &opts);
        Ok(())
    }

    /// Flush the memtables of every namespace.
    pub fn flush(&self, wait: bool) -> EngineResult<()> {
        let mut opts = FlushOptions::default();
        opts.set_wait(wait);
        for ns in &self.namespaces {
            self.db
                .flush_cf_opt(self.cf(ns)?, &opts)
                .map_err(|e| EngineError::storage("flush failed", e))?;
        }
        Ok(())
    }

    /// Sync the write-ahead log.
    pub fn flush_wal(&self, sync: bool) -> EngineResult<()> {
        self.db
            .flush_wal(sync)
            .map_err(|e| EngineError::storage("wal flush failed", e))
    }

    /// Create a consistent on-disk checkpoint at `path`, flushing first.
    pub fn checkpoint(&self, path: &Path) -> EngineResult<()> {
        self.flush(true)?;
        let cp = Checkpoint::new(&self.db)
            .map_err(|e| EngineError::storage("checkpoint failed", e))?;
        cp.create_checkpoint(path)
            .map_err(|e| EngineError::storage("checkpoint failed", e))
    }

    /// Integer property of the underlying store, zero when unavailable.
    pub fn property_u64(&self, name: &str) -> u64 {
        self.db.property_int_value(name).ok().flatten().unwrap_or(0)
    }
}

fn db_options(tuning: &DbTuning) -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);
    opts.set_max_background_jobs(tuning.max_background_jobs);
    opts
}

fn cf_options(tuning: &DbTuning) -> Options {
    let mut opts = Options::default();
    opts.set_write_buffer_size(tuning.write_buffer_size_mb * 1024 * 1024);
    opts.set_max_write_buffer_number(tuning.max_write_buffer_number);
    opts.set_target_file_size_base((tuning.target_file_size_mb * 1024 * 1024) as u64);
    opts.set_compression_type(DBCompressionType::Lz4);
    opts
}

fn cf_descriptors(namespaces: &[String], tuning: &DbTuning) -> Vec<ColumnFamilyDescriptor> {
    namespaces
        .iter()
        .map(|ns| ColumnFamilyDescriptor::new(ns, cf_options(tuning)))
        .collect()
}
