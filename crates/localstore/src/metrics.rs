//! Metrics for the storage engine.
//!
//! Thin wrappers over the `metrics` facade macros so metric names live in
//! one place. Gauge-shaped series are refreshed periodically by the engine
//! timer thread; histograms are recorded at the call sites.

use metrics::{gauge, histogram};
use std::path::Path;
use std::time::Duration;

/// Smoothed iterator seek latency, recorded on every measured seek.
pub fn record_iter_latency(estimate_ns: u64) {
    histogram!("localstore_iter_seek_latency_ns").record(estimate_ns as f64);
}

/// Wall time of one range compaction.
pub fn record_compaction_duration(elapsed: Duration) {
    histogram!("localstore_compaction_duration_ms").record(elapsed.as_secs_f64() * 1000.0);
}

/// Number of checkpoint views currently open.
pub fn set_opened_checkpoints(count: usize) {
    gauge!("localstore_open_checkpoints").set(count as f64);
}

/// Number of compaction tasks currently in flight.
pub fn set_inflight_compactions(count: usize) {
    gauge!("localstore_compaction_tasks").set(count as f64);
}

/// Total and usable filesystem space under a storage root.
pub fn set_disk_space(root: &str, path: &Path) {
    if let Some((total, usable)) = fs_space(path) {
        gauge!("localstore_disk_total_bytes", "root" => root.to_string()).set(total as f64);
        gauge!("localstore_disk_usable_bytes", "root" => root.to_string()).set(usable as f64);
    }
}

/// Leaf store memory usage, one series per kind (block cache, index and
/// filter blocks, memtables, pinned blocks).
pub fn set_store_memory(kind: &str, bytes: u64) {
    gauge!("localstore_store_mem_bytes", "kind" => kind.to_string()).set(bytes as f64);
}

#[cfg(unix)]
fn fs_space(path: &Path) -> Option<(u64, u64)> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let path = CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(path.as_ptr(), &mut stats) } != 0 {
        return None;
    }
    let frsize = stats.f_frsize as u64;
    Some((
        stats.f_blocks as u64 * frsize,
        stats.f_bavail as u64 * frsize,
    ))
}

#[cfg(not(unix))]
fn fs_space(_path: &Path) -> Option<(u64, u64)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_fs_space_reports_nonzero_for_tmp() {
        let (total, usable) = fs_space(Path::new("/tmp")).unwrap();
        assert!(total > 0);
        assert!(usable <= total);
    }
}
