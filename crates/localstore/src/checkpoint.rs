//! Opened checkpoints and their time-expiring cache.

use crate::config::DbTuning;
use crate::error::EngineResult;
use crate::iterator::LeafIterator;
use crate::leaf::Leaf;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Read-only view over a checkpoint directory.
///
/// Opened lazily on the first read against the checkpoint id and closed
/// when the cache evicts it (inactivity) or the engine stops. The
/// underlying store and its file handles are released when the last
/// reference drops.
pub struct OpenedCheckpoint {
    id: String,
    leaf: Leaf,
}

impl OpenedCheckpoint {
    pub(crate) fn open(
        id: &str,
        dir: &Path,
        namespaces: &[String],
        tuning: &DbTuning,
    ) -> EngineResult<Self> {
        Ok(Self {
            id: id.to_string(),
            leaf: Leaf::open_read_only(dir, namespaces, tuning)?,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Point lookup against the frozen state.
    pub fn get(&self, ns: &str, key: &[u8]) -> EngineResult<Option<Bytes>> {
        Ok(self.leaf.get(ns, key)?.map(Bytes::from))
    }

    /// Bloom-filter existence check against the frozen state; may report
    /// true for absent keys.
    pub fn may_exist(&self, ns: &str, key: &[u8]) -> EngineResult<bool> {
        self.leaf.may_exist(ns, key)
    }

    /// Range iterator over the frozen state.
    pub fn iterator(
        &self,
        ns: &str,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> EngineResult<LeafIterator<'_>> {
        self.leaf.iterator(ns, start, end)
    }

    /// Approximate size of `[start, end)` in the frozen state.
    pub fn approximate_size(
        &self,
        ns: &str,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> EngineResult<u64> {
        self.leaf.ranged_size(ns, start, end)
    }
}

struct Entry {
    view: Arc<OpenedCheckpoint>,
    last_access: Instant,
}

/// Cache of opened checkpoint views, expired after an inactivity window.
///
/// Expiration is a manual sweep on the engine timer thread; an evicted view
/// is dropped right there, which closes the read-only store synchronously
/// unless a reader still holds it.
pub(crate) struct CheckpointCache {
    idle: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl CheckpointCache {
    pub(crate) fn new(idle: Duration) -> Self {
        Self {
            idle,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a cached view, opening one if needed. Any access resets the
    /// entry's expiration clock.
    pub(crate) fn get_or_open(
        &self,
        id: &str,
        open: impl FnOnce() -> EngineResult<OpenedCheckpoint>,
    ) -> EngineResult<Arc<OpenedCheckpoint>> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(id) {
            entry.last_access = Instant::now();
            return Ok(entry.view.clone());
        }
        let view = Arc::new(open()?);
        entries.insert(
            id.to_string(),
            Entry {
                view: view.clone(),
                last_access: Instant::now(),
            },
        );
        Ok(view)
    }

    /// Close the view of one checkpoint, if it is open.
    pub(crate) fn invalidate(&self, id: &str) {
        if self.entries.lock().remove(id).is_some() {
            debug!(checkpoint = id, "closed checkpoint view");
        }
    }

    /// Close every open view; runs at engine stop.
    pub(crate) fn invalidate_all(&self) {
        let drained: Vec<Entry> = self
            .entries
            .lock()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &drained {
            debug!(checkpoint = entry.view.id(), "closed checkpoint view");
        }
    }

    /// Drop entries idle past the expiration window. The drop happens after
    /// the map lock is released so closing a store never blocks readers.
    pub(crate) fn sweep(&self) {
        let now = Instant::now();
        let mut evicted = Vec::new();
        {
            let mut entries = self.entries.lock();
            entries.retain(|id, entry| {
                if now.duration_since(entry.last_access) >= self.idle {
                    debug!(checkpoint = id.as_str(), "closing expired checkpoint view");
                    evicted.push(entry.view.clone());
                    false
                } else {
                    true
                }
            });
        }
        drop(evicted);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::DEFAULT_NS;

    fn open_checkpoint(dir: &Path) -> EngineResult<OpenedCheckpoint> {
        let namespaces = vec![DEFAULT_NS.to_string()];
        let tuning = DbTuning::default();
        let live_dir = dir.join("live");
        let cp_dir = dir.join("cp");
        {
            let live = Leaf::open(&live_dir, &namespaces, &tuning, false)?;
            let mut batch = rocksdb::WriteBatch::default();
            batch.put_cf(live.cf(DEFAULT_NS)?, b"k", b"v");
            live.write(batch)?;
            live.checkpoint(&cp_dir)?;
        }
        OpenedCheckpoint::open("cp", &cp_dir, &namespaces, &tuning)
    }

    #[test]
    fn test_cache_reuses_open_view() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CheckpointCache::new(Duration::from_secs(600));
        let first = cache
            .get_or_open("cp", || open_checkpoint(dir.path()))
            .unwrap();
        let second = cache
            .get_or_open("cp", || panic!("must reuse the cached view"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert_eq!(first.get(DEFAULT_NS, b"k").unwrap().as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn test_sweep_closes_idle_views() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CheckpointCache::new(Duration::ZERO);
        cache
            .get_or_open("cp", || open_checkpoint(dir.path()))
            .unwrap();
        cache.sweep();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_invalidate_unknown_id_is_noop() {
        let cache = CheckpointCache::new(Duration::from_secs(600));
        cache.invalidate("missing");
        assert_eq!(cache.len(), 0);
    }
}
