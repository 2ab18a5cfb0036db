//! Range compaction scheduling.
//!
//! Ranges that cross their tombstone thresholds and scans with degraded
//! seek latency both nominate `[start, end)` slices for compaction. Hints
//! accumulate in a per-namespace ordered map, overlapping and adjacent
//! hints are coalesced at dispatch, and a single worker thread runs one
//! compaction pass at a time so reads and writes keep flowing.

use crate::range_util::{narrowest_end, widest_end};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// Identity of one compaction slice. Concurrent identical requests share a
/// single in-flight task.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct TaskKey {
    pub(crate) ns: String,
    pub(crate) start: Option<Bytes>,
    pub(crate) end: Option<Bytes>,
}

/// Jobs handled by the compaction worker thread. Shutdown is signalled by
/// dropping the sender.
pub(crate) enum Job {
    Compact {
        key: TaskKey,
        task: Arc<CompactionTask>,
    },
    /// Pass barrier. Queued after a dispatch pass, it runs only once the
    /// FIFO worker has finished every job of that pass.
    Barrier,
}

/// Completion handle for one in-flight compaction.
pub(crate) struct CompactionTask {
    done: Mutex<Option<Result<(), String>>>,
    signal: Condvar,
}

impl CompactionTask {
    fn new() -> Self {
        Self {
            done: Mutex::new(None),
            signal: Condvar::new(),
        }
    }

    pub(crate) fn complete(&self, result: Result<(), String>) {
        let mut done = self.done.lock();
        if done.is_none() {
            *done = Some(result);
            self.signal.notify_all();
        }
    }

    /// Block until the task settles.
    pub(crate) fn wait(&self) -> Result<(), String> {
        let mut done = self.done.lock();
        while done.is_none() {
            self.signal.wait(&mut done);
        }
        done.clone().unwrap_or(Ok(()))
    }
}

/// Per-namespace hint queues plus the single-pass dispatch state.
pub(crate) struct Scheduler {
    // key: range start (empty = open below), value: range end (None = open above)
    queues: HashMap<String, Mutex<BTreeMap<Bytes, Option<Bytes>>>>,
    compacting: AtomicBool,
    tasks: Mutex<HashMap<TaskKey, Arc<CompactionTask>>>,
    tx: Mutex<Option<Sender<Job>>>,
}

impl Scheduler {
    pub(crate) fn new(namespaces: &[String]) -> Self {
        let queues = namespaces
            .iter()
            .map(|ns| (ns.clone(), Mutex::new(BTreeMap::new())))
            .collect();
        Self {
            queues,
            compacting: AtomicBool::new(false),
            tasks: Mutex::new(HashMap::new()),
            tx: Mutex::new(None),
        }
    }

    /// Wire the worker's job queue in at engine start.
    pub(crate) fn attach(&self, tx: Sender<Job>) {
        *self.tx.lock() = Some(tx);
    }

    /// Drop the job queue at engine stop; the worker exits once the queue
    /// drains.
    pub(crate) fn detach(&self) {
        *self.tx.lock() = None;
    }

    /// Queue a hint. On a start-key collision the narrowest end wins here
    /// (unbounded beats everything); the dispatch pass widens again while
    /// coalescing.
    pub(crate) fn submit(&self, ns: &str, start: Option<Bytes>, end: Option<Bytes>) {
        let Some(queue) = self.queues.get(ns) else {
            return;
        };
        let start = start.unwrap_or_else(Bytes::new);
        let mut queue = queue.lock();
        match queue.remove(&start) {
            None => {
                queue.insert(start, end);
            }
            Some(existing) => {
                queue.insert(start, narrowest_end(existing, end));
            }
        }
    }

    /// Run one dispatch pass unless one is already in flight: poll the
    /// lowest hint of every namespace, fuse everything overlapping or
    /// adjacent to it, and queue one compaction per namespace followed by
    /// the pass barrier.
    pub(crate) fn dispatch(&self) {
        if self
            .compacting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        for (ns, queue) in &self.queues {
            let slice = {
                let mut queue = queue.lock();
                poll_coalesced(&mut queue)
            };
            if let Some((start, end)) = slice {
                self.spawn_task(TaskKey {
                    ns: ns.clone(),
                    start: if start.is_empty() { None } else { Some(start) },
                    end,
                });
            }
        }
        if !self.enqueue(Job::Barrier) {
            self.compacting.store(false, Ordering::Release);
        }
    }

    fn spawn_task(&self, key: TaskKey) -> Arc<CompactionTask> {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get(&key) {
            return task.clone();
        }
        let task = Arc::new(CompactionTask::new());
        tasks.insert(key.clone(), task.clone());
        drop(tasks);
        if !self.enqueue(Job::Compact {
            key: key.clone(),
            task: task.clone(),
        }) {
            // executor already gone (engine stopping): settle immediately
            task.complete(Ok(()));
            self.tasks.lock().remove(&key);
        }
        task
    }

    fn enqueue(&self, job: Job) -> bool {
        match &*self.tx.lock() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    /// Drop the in-flight marker of a settled task. The task identity is
    /// compared so a later identical task is not removed by accident.
    pub(crate) fn finish_task(&self, key: &TaskKey, task: &Arc<CompactionTask>) {
        let mut tasks = self.tasks.lock();
        if let Some(current) = tasks.get(key) {
            if Arc::ptr_eq(current, task) {
                tasks.remove(key);
            }
        }
    }

    /// Flip the pass guard back to idle; reports whether hints are still
    /// pending so the caller can kick another pass.
    pub(crate) fn end_pass(&self) -> bool {
        self.compacting.store(false, Ordering::Release);
        self.has_pending()
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.queues.values().any(|q| !q.lock().is_empty())
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Wait for every in-flight task to settle, swallowing failures; used
    /// by the shutdown path.
    pub(crate) fn drain(&self) {
        let tasks: Vec<Arc<CompactionTask>> = self.tasks.lock().values().cloned().collect();
        for task in tasks {
            let _ = task.wait();
        }
    }

    #[cfg(test)]
    fn pending(&self, ns: &str) -> Vec<(Bytes, Option<Bytes>)> {
        self.queues[ns]
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Poll the lowest-keyed hint and fuse every hint whose start falls inside
/// (or right at the edge of) the growing slice.
fn poll_coalesced(queue: &mut BTreeMap<Bytes, Option<Bytes>>) -> Option<(Bytes, Option<Bytes>)> {
    let (start, mut end) = queue.pop_first()?;
    loop {
        let next = queue
            .range(start.clone()..)
            .next()
            .map(|(k, v)| (k.clone(), v.clone()));
        match next {
            Some((next_start, next_end))
                if end.as_ref().map_or(true, |end| next_start <= *end) =>
            {
                end = widest_end(end, next_end);
                queue.remove(&next_start);
            }
            _ => return Some((start, end)),
        }
    }
}
