//! Engine facade: lifecycle, identity, the public read/write surface,
//! checkpoint management and garbage collection.

use crate::batch::Batch;
use crate::checkpoint::{CheckpointCache, OpenedCheckpoint};
use crate::compaction::{Job, Scheduler};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::iterator::EngineIterator;
use crate::leaf::{Leaf, DEFAULT_NS};
use crate::metrics;
use crate::range::{CompactionTrigger, KeyRange};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

const OVERRIDE_IDENTITY_FILE: &str = "OVERRIDEIDENTITY";
const IDENTITY_FILE: &str = "IDENTITY";

/// Cadence of the background timer thread (cache sweep, gauge refresh, GC
/// deadline checks).
const TIMER_TICK: Duration = Duration::from_secs(1);

/// Engine lifecycle states. Transitions are monotonic; a stopped engine
/// cannot be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Init = 0,
    Started = 1,
    Stopping = 2,
    Stopped = 3,
}

impl EngineState {
    fn from_u8(value: u8) -> EngineState {
        match value {
            0 => EngineState::Init,
            1 => EngineState::Started,
            2 => EngineState::Stopping,
            _ => EngineState::Stopped,
        }
    }
}

/// Predicate consulted by checkpoint GC: does the caller still reference
/// this checkpoint id?
pub type CheckpointCheck = Box<dyn Fn(&str) -> bool + Send + Sync>;

pub(crate) struct Shared {
    config: EngineConfig,
    namespaces: Vec<String>,
    pub(crate) leaf: Leaf,
    identity: String,
    state: AtomicU8,
    trigger: CompactionTrigger,
    next_range_id: AtomicU64,
    next_batch_id: AtomicU64,
    batches: DashMap<u64, Mutex<Batch>>,
    pub(crate) scheduler: Scheduler,
    checkpoints: CheckpointCache,
    checkpoint_check: CheckpointCheck,
}

impl Shared {
    pub(crate) fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Queue a compaction hint and kick the scheduler. Never fails; hints
    /// against a non-started engine are dropped.
    pub(crate) fn submit_hint(&self, ns: &str, start: Option<Bytes>, end: Option<Bytes>) {
        if self.state() != EngineState::Started {
            return;
        }
        self.scheduler.submit(ns, start, end);
        self.compact();
    }

    fn compact(&self) {
        if self.state() != EngineState::Started {
            return;
        }
        self.scheduler.dispatch();
    }

    fn checkpoint_path(&self, id: &str) -> PathBuf {
        self.config.checkpoint_root.join(id)
    }
}

struct Ticker {
    stopped: Mutex<bool>,
    signal: Condvar,
}

impl Ticker {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.signal.notify_all();
    }

    /// Sleep one tick; returns false once the engine is stopping.
    fn wait(&self, tick: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if *stopped {
            return false;
        }
        self.signal.wait_for(&mut stopped, tick);
        !*stopped
    }
}

/// Namespaced, range-aware embedded key/value storage engine.
///
/// One engine owns one leaf store instance with a column family per
/// namespace, plus the background machinery around it: the compaction
/// worker thread, the checkpoint view cache and the checkpoint garbage
/// collector.
pub struct Engine {
    shared: Arc<Shared>,
    ticker: Arc<Ticker>,
    worker: Mutex<Option<JoinHandle<()>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Open (or create) an engine.
    ///
    /// `namespaces` is the namespace set fixed for the engine's lifetime;
    /// the `default` namespace is always included and ordered first.
    /// `override_identity`, when given at first creation of the data
    /// directory, is persisted and preferred over the store-native identity
    /// on later loads. `checkpoint_check` tells the garbage collector which
    /// checkpoints the caller still references.
    pub fn open(
        config: EngineConfig,
        namespaces: &[&str],
        override_identity: Option<&str>,
        checkpoint_check: CheckpointCheck,
    ) -> EngineResult<Engine> {
        fs::create_dir_all(&config.data_root)?;
        fs::create_dir_all(&config.checkpoint_root)?;
        let namespaces = normalize_namespaces(namespaces);
        let is_creation = fs::read_dir(&config.data_root)?.next().is_none();
        let leaf = Leaf::open(
            &config.data_root,
            &namespaces,
            &config.db,
            config.wal_disabled(),
        )?;
        let identity = load_identity(&config.data_root, is_creation, override_identity)?;
        info!(
            identity = identity.as_str(),
            path = %config.data_root.display(),
            "engine {}",
            if is_creation { "initialized" } else { "loaded" }
        );
        let trigger = CompactionTrigger {
            min_tombstone_keys: config.compact_min_tombstone_keys,
            tombstone_percent: config.compact_tombstone_percent,
        };
        let shared = Arc::new(Shared {
            scheduler: Scheduler::new(&namespaces),
            checkpoints: CheckpointCache::new(config.checkpoint_idle()),
            namespaces,
            leaf,
            identity,
            state: AtomicU8::new(EngineState::Init as u8),
            trigger,
            next_range_id: AtomicU64::new(0),
            next_batch_id: AtomicU64::new(0),
            batches: DashMap::new(),
            checkpoint_check,
            config,
        });
        Ok(Engine {
            shared,
            ticker: Arc::new(Ticker::new()),
            worker: Mutex::new(None),
            timer: Mutex::new(None),
        })
    }

    /// Start the background machinery. Must be called before any data
    /// operation; starting an already started engine is a no-op.
    pub fn start(&self) -> EngineResult<()> {
        match self.shared.state.compare_exchange(
            EngineState::Init as u8,
            EngineState::Started as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(state) if state == EngineState::Started as u8 => return Ok(()),
            Err(_) => return Err(EngineError::NotStarted),
        }
        let (tx, rx) = channel();
        self.shared.scheduler.attach(tx);
        let worker_shared = self.shared.clone();
        let worker = thread::Builder::new()
            .name("compaction-executor".into())
            .spawn(move || worker_loop(worker_shared, rx))?;
        *self.worker.lock() = Some(worker);
        let timer_shared = self.shared.clone();
        let ticker = self.ticker.clone();
        let timer = thread::Builder::new()
            .name("engine-timer".into())
            .spawn(move || timer_loop(timer_shared, ticker))?;
        *self.timer.lock() = Some(timer);
        info!(identity = self.shared.identity.as_str(), "engine started");
        Ok(())
    }

    /// Stop the engine: the timer stands down, opened checkpoints are
    /// closed, in-flight compactions are drained (their failures are
    /// swallowed) and the worker thread exits. The live store itself closes
    /// when the engine value is dropped; a stopped engine cannot be
    /// restarted.
    pub fn stop(&self) {
        match self.shared.state.compare_exchange(
            EngineState::Started as u8,
            EngineState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(state) if state == EngineState::Init as u8 => {
                self.shared
                    .state
                    .store(EngineState::Stopped as u8, Ordering::Release);
                return;
            }
            Err(_) => return, // already stopping or stopped
        }
        info!(identity = self.shared.identity.as_str(), "stopping engine");
        // timer first so GC and gauges stop touching the store
        self.ticker.stop();
        if let Some(timer) = self.timer.lock().take() {
            let _ = timer.join();
        }
        self.shared.checkpoints.invalidate_all();
        debug!(
            tasks = self.shared.scheduler.in_flight(),
            "waiting for in-flight compactions"
        );
        self.shared.scheduler.drain();
        // dropping the sender lets the worker drain queued jobs and exit
        self.shared.scheduler.detach();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
        self.shared
            .state
            .store(EngineState::Stopped as u8, Ordering::Release);
        info!(identity = self.shared.identity.as_str(), "engine stopped");
    }

    /// Stable engine identity; unchanged across restarts of the same data
    /// directory.
    pub fn id(&self) -> &str {
        &self.shared.identity
    }

    /// Ordered namespace set, `default` first.
    pub fn namespaces(&self) -> &[String] {
        &self.shared.namespaces
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    fn check_started(&self) -> EngineResult<()> {
        if self.shared.state() == EngineState::Started {
            Ok(())
        } else {
            Err(EngineError::NotStarted)
        }
    }

    /// Create a statistics cursor over `[start, end)` in `ns`. Ranges are
    /// logical: many overlapping ranges may address the same namespace.
    pub fn new_key_range(
        &self,
        ns: &str,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> EngineResult<Arc<KeyRange>> {
        self.check_started()?;
        if !self.shared.namespaces.iter().any(|n| n == ns) {
            return Err(EngineError::UnknownNamespace(ns.to_string()));
        }
        let id = self.shared.next_range_id.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(KeyRange::new(
            id,
            ns.to_string(),
            start.map(Bytes::copy_from_slice),
            end.map(Bytes::copy_from_slice),
        )))
    }

    // ==================== Batched writes ====================

    /// Open a new write batch and return its id.
    pub fn start_batch(&self) -> EngineResult<u64> {
        self.check_started()?;
        let id = self.shared.next_batch_id.fetch_add(1, Ordering::Relaxed);
        self.shared.batches.insert(id, Mutex::new(Batch::new(id)));
        Ok(id)
    }

    fn with_open_batch<R>(
        &self,
        batch_id: u64,
        f: impl FnOnce(&mut Batch) -> EngineResult<R>,
    ) -> EngineResult<R> {
        self.check_started()?;
        let entry = self
            .shared
            .batches
            .get(&batch_id)
            .ok_or(EngineError::UnknownBatch(batch_id))?;
        let mut batch = entry.lock();
        f(&mut batch)
    }

    /// Buffer a put of `key` in the batch.
    pub fn put(
        &self,
        batch_id: u64,
        range: &Arc<KeyRange>,
        key: &[u8],
        value: &[u8],
    ) -> EngineResult<()> {
        self.with_open_batch(batch_id, |batch| {
            batch.put(&self.shared.leaf, range, key, value)
        })
    }

    /// Buffer an insert of a key the caller promises is absent. Inserting
    /// an existing key is a caller bug; the engine does not detect it.
    pub fn insert(
        &self,
        batch_id: u64,
        range: &Arc<KeyRange>,
        key: &[u8],
        value: &[u8],
    ) -> EngineResult<()> {
        self.with_open_batch(batch_id, |batch| {
            batch.insert(&self.shared.leaf, range, key, value)
        })
    }

    /// Buffer a point delete in the batch.
    pub fn delete(&self, batch_id: u64, range: &Arc<KeyRange>, key: &[u8]) -> EngineResult<()> {
        self.with_open_batch(batch_id, |batch| batch.delete(&self.shared.leaf, range, key))
    }

    /// Buffer a range delete of `[start, end)` in the batch; a missing
    /// bound is resolved against the current content of the namespace.
    pub fn clear_sub_range(
        &self,
        batch_id: u64,
        range: &Arc<KeyRange>,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> EngineResult<()> {
        self.with_open_batch(batch_id, |batch| {
            batch.delete_range(&self.shared.leaf, range, start, end)
        })
    }

    /// Commit the batch. An empty batch aborts its touched ranges and
    /// succeeds; a non-empty one is applied atomically and its statistic
    /// deltas folded into every touched range, possibly arming the
    /// compaction trigger. On commit failure counters stay unchanged and
    /// the error is surfaced.
    pub fn end_batch(&self, batch_id: u64) -> EngineResult<()> {
        self.check_started()?;
        let (_, batch) = self
            .shared
            .batches
            .remove(&batch_id)
            .ok_or(EngineError::UnknownBatch(batch_id))?;
        let batch = batch.into_inner();
        if batch.count() == 0 {
            for range in batch.touched() {
                range.abort_batch(batch_id);
            }
            return Ok(());
        }
        let (write_batch, ranges) = batch.into_parts();
        match self.shared.leaf.write(write_batch) {
            Ok(()) => {
                for range in &ranges {
                    if range.end_batch(batch_id, &self.shared.trigger) {
                        self.shared.submit_hint(
                            range.namespace(),
                            range.start().cloned(),
                            range.end().cloned(),
                        );
                    }
                }
                Ok(())
            }
            Err(e) => {
                for range in &ranges {
                    range.abort_batch(batch_id);
                }
                error!(batch = batch_id, error = %e, "batch commit failed");
                Err(e)
            }
        }
    }

    /// Drop the batch without applying anything.
    pub fn abort_batch(&self, batch_id: u64) -> EngineResult<()> {
        self.check_started()?;
        let (_, batch) = self
            .shared
            .batches
            .remove(&batch_id)
            .ok_or(EngineError::UnknownBatch(batch_id))?;
        let batch = batch.into_inner();
        for range in batch.touched() {
            range.abort_batch(batch_id);
        }
        Ok(())
    }

    // ==================== Direct mutations ====================

    fn single_op(&self, f: impl FnOnce(u64) -> EngineResult<()>) -> EngineResult<()> {
        let batch_id = self.start_batch()?;
        match f(batch_id) {
            Ok(()) => self.end_batch(batch_id),
            Err(e) => {
                let _ = self.abort_batch(batch_id);
                Err(e)
            }
        }
    }

    /// Put a single key outside any caller batch.
    pub fn do_put(&self, range: &Arc<KeyRange>, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.single_op(|id| self.put(id, range, key, value))
    }

    /// Insert a single key outside any caller batch.
    pub fn do_insert(&self, range: &Arc<KeyRange>, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.single_op(|id| self.insert(id, range, key, value))
    }

    /// Delete a single key outside any caller batch.
    pub fn do_delete(&self, range: &Arc<KeyRange>, key: &[u8]) -> EngineResult<()> {
        self.single_op(|id| self.delete(id, range, key))
    }

    /// Delete `[start, end)` outside any caller batch.
    pub fn do_clear_sub_range(
        &self,
        range: &Arc<KeyRange>,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> EngineResult<()> {
        self.single_op(|id| self.clear_sub_range(id, range, start, end))
    }

    // ==================== Reads ====================

    /// Existence check; may report true for absent keys (bloom-filter
    /// semantics).
    pub fn exist(&self, ns: &str, key: &[u8]) -> EngineResult<bool> {
        self.check_started()?;
        self.shared.leaf.may_exist(ns, key)
    }

    /// Point lookup against the live store.
    pub fn get(&self, ns: &str, key: &[u8]) -> EngineResult<Option<Bytes>> {
        self.check_started()?;
        Ok(self.shared.leaf.get(ns, key)?.map(Bytes::from))
    }

    /// Latency-aware iterator over `[start, end)` of the live store. Slow
    /// seeks feed the compaction scheduler.
    pub fn iterator(
        &self,
        ns: &str,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> EngineResult<EngineIterator<'_>> {
        self.check_started()?;
        let inner = self.shared.leaf.iterator(ns, start, end)?;
        Ok(EngineIterator::new(
            inner,
            &self.shared,
            ns.to_string(),
            start.map(Bytes::copy_from_slice),
            end.map(Bytes::copy_from_slice),
        ))
    }

    /// Approximate size of `[start, end)`, memtable and file contributions
    /// included.
    pub fn approximate_size(
        &self,
        ns: &str,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> EngineResult<u64> {
        self.check_started()?;
        self.shared.leaf.ranged_size(ns, start, end)
    }

    /// Skip roughly `count` keys forward from the beginning of the range
    /// and return the key landed on, or the last key seen when the range is
    /// shorter. Used by the layer above to pick split points.
    pub fn skip(&self, range: &KeyRange, count: u64) -> EngineResult<Bytes> {
        self.check_started()?;
        let mut it = self.shared.leaf.iterator(
            range.namespace(),
            range.start().map(|b| b.as_ref()),
            range.end().map(|b| b.as_ref()),
        )?;
        it.seek_to_first();
        let mut seen = 0u64;
        loop {
            let last_key = if it.is_valid() {
                it.key().map(Bytes::copy_from_slice).unwrap_or_default()
            } else {
                Bytes::new()
            };
            // step in chunks of 100; the accuracy is 100, don't ask for more
            for _ in 0..100 {
                if !it.is_valid() {
                    return Ok(last_key);
                }
                it.next();
                seen += 1;
                if seen >= count {
                    return Ok(it.key().map(Bytes::copy_from_slice).unwrap_or(last_key));
                }
            }
        }
    }

    // ==================== Checkpoints ====================

    /// Create an immutable on-disk checkpoint addressed by `id`.
    pub fn checkpoint(&self, id: &str) -> EngineResult<()> {
        self.check_started()?;
        let path = self.shared.checkpoint_path(id);
        debug!(checkpoint = id, path = %path.display(), "creating checkpoint");
        self.shared.leaf.checkpoint(&path)
    }

    /// Whether a checkpoint directory exists for `id`.
    pub fn has_checkpoint(&self, id: &str) -> EngineResult<bool> {
        self.check_started()?;
        Ok(self.shared.checkpoint_path(id).exists())
    }

    /// Read-only view of a checkpoint, opened lazily and cached until idle
    /// for the configured window.
    pub fn checkpoint_view(&self, id: &str) -> EngineResult<Arc<OpenedCheckpoint>> {
        self.check_started()?;
        let path = self.shared.checkpoint_path(id);
        if !path.exists() {
            return Err(EngineError::CheckpointNotFound(id.to_string()));
        }
        let namespaces = &self.shared.namespaces;
        let tuning = &self.shared.config.db;
        self.shared
            .checkpoints
            .get_or_open(id, || OpenedCheckpoint::open(id, &path, namespaces, tuning))
    }

    /// Point lookup against a checkpoint.
    pub fn checkpoint_get(&self, id: &str, ns: &str, key: &[u8]) -> EngineResult<Option<Bytes>> {
        self.checkpoint_view(id)?.get(ns, key)
    }

    /// Existence check against a checkpoint; may report true for absent
    /// keys.
    pub fn checkpoint_exist(&self, id: &str, ns: &str, key: &[u8]) -> EngineResult<bool> {
        self.checkpoint_view(id)?.may_exist(ns, key)
    }

    /// Approximate size of `[start, end)` within a checkpoint.
    pub fn checkpoint_approximate_size(
        &self,
        id: &str,
        ns: &str,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> EngineResult<u64> {
        self.checkpoint_view(id)?.approximate_size(ns, start, end)
    }

    // ==================== Maintenance ====================

    /// Sync the write-ahead log, or force a memtable flush when the WAL is
    /// disabled.
    pub fn flush(&self) -> EngineResult<()> {
        self.check_started()?;
        if self.shared.config.wal_disabled() {
            self.shared.leaf.flush(true)
        } else {
            self.shared.leaf.flush_wal(true)
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.shared.state() == EngineState::Started {
            self.stop();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, rx: Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Compact { key, task } => {
                if shared.state() == EngineState::Started {
                    debug!(ns = key.ns.as_str(), "compaction start");
                    let begin = Instant::now();
                    let result =
                        shared
                            .leaf
                            .compact_range(&key.ns, key.start.as_deref(), key.end.as_deref());
                    metrics::record_compaction_duration(begin.elapsed());
                    match result {
                        Ok(()) => {
                            debug!(ns = key.ns.as_str(), "compaction end");
                            task.complete(Ok(()));
                        }
                        Err(e) => {
                            error!(ns = key.ns.as_str(), error = %e, "compaction failed");
                            task.complete(Err(e.to_string()));
                        }
                    }
                } else {
                    task.complete(Ok(()));
                }
                shared.scheduler.finish_task(&key, &task);
            }
            Job::Barrier => {
                if shared.scheduler.end_pass() {
                    shared.compact();
                }
            }
        }
    }
}

fn timer_loop(shared: Arc<Shared>, ticker: Arc<Ticker>) {
    let mut last_gc = Instant::now();
    while ticker.wait(TIMER_TICK) {
        shared.checkpoints.sweep();
        refresh_gauges(&shared);
        if last_gc.elapsed() >= shared.config.gc_interval() {
            gc_checkpoints(&shared);
            last_gc = Instant::now();
        }
    }
}

fn refresh_gauges(shared: &Shared) {
    metrics::set_opened_checkpoints(shared.checkpoints.len());
    metrics::set_inflight_compactions(shared.scheduler.in_flight());
    metrics::set_disk_space("data", &shared.config.data_root);
    metrics::set_disk_space("checkpoints", &shared.config.checkpoint_root);
    metrics::set_store_memory(
        "blockcache",
        shared.leaf.property_u64("rocksdb.block-cache-usage"),
    );
    metrics::set_store_memory(
        "indexfilters",
        shared.leaf.property_u64("rocksdb.estimate-table-readers-mem"),
    );
    metrics::set_store_memory(
        "memtable",
        shared.leaf.property_u64("rocksdb.cur-size-all-mem-tables"),
    );
    metrics::set_store_memory(
        "pinnedblocks",
        shared.leaf.property_u64("rocksdb.block-cache-pinned-usage"),
    );
}

/// Delete checkpoint directories the caller no longer references. Only
/// checkpoints older than half the GC interval are considered, so a
/// checkpoint created just before a pass is never deleted before the caller
/// had a chance to observe it.
fn gc_checkpoints(shared: &Shared) {
    let min_age = shared.config.checkpoint_min_age();
    let entries = match fs::read_dir(&shared.config.checkpoint_root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "failed to list checkpoint root");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() || !older_than(&path, min_age) {
            continue;
        }
        let Some(id) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if (shared.checkpoint_check)(&id) {
            continue;
        }
        debug!(checkpoint = id.as_str(), "deleting unreferenced checkpoint");
        shared.checkpoints.invalidate(&id);
        if let Err(e) = fs::remove_dir_all(&path) {
            error!(checkpoint = id.as_str(), error = %e, "failed to delete checkpoint");
        }
    }
}

fn older_than(path: &Path, age: Duration) -> bool {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .map(|elapsed| elapsed > age)
            .unwrap_or(false),
        Err(_) => false,
    }
}

fn load_identity(
    data_root: &Path,
    is_creation: bool,
    override_identity: Option<&str>,
) -> EngineResult<String> {
    let override_path = data_root.join(OVERRIDE_IDENTITY_FILE);
    if is_creation {
        if let Some(identity) = override_identity {
            let identity = identity.trim();
            if !identity.is_empty() {
                fs::write(&override_path, identity)?;
            }
        }
    }
    if override_path.exists() {
        if let Some(line) = first_line(&override_path) {
            return Ok(line);
        }
    }
    first_line(&data_root.join(IDENTITY_FILE))
        .ok_or_else(|| EngineError::IdentityUnreadable(data_root.to_path_buf()))
}

fn first_line(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let line = content.lines().next()?.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

fn normalize_namespaces(namespaces: &[&str]) -> Vec<String> {
    let mut out = vec![DEFAULT_NS.to_string()];
    for ns in namespaces {
        if *ns != DEFAULT_NS && !out.iter().any(|n| n == ns) {
            out.push((*ns).to_string());
        }
    }
    out
}
