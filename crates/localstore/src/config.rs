//! Engine configuration.
//!
//! YAML-backed configuration: serde structs with per-field defaults, a
//! `merge` for layering a loaded file over the defaults, and `Duration`
//! accessors for time-valued options.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the live store.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Directory holding checkpoints, one subdirectory per checkpoint id.
    #[serde(default = "default_checkpoint_root")]
    pub checkpoint_root: PathBuf,
    /// Skip the write-ahead log on commit. With the WAL disabled, `flush()`
    /// forces a memtable flush instead of a WAL sync. Absent from a file
    /// means "not set", so an overlay cannot reset a base layer's choice.
    #[serde(default)]
    pub disable_wal: Option<bool>,
    /// Checkpoint garbage collection period in seconds. Checkpoints younger
    /// than half this period are never deleted.
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    /// Inactivity window in seconds before an opened checkpoint view is
    /// closed.
    #[serde(default = "default_checkpoint_idle_secs")]
    pub checkpoint_idle_secs: u64,
    /// Lower bound on a range's tombstone count before the ratio trigger
    /// may fire.
    #[serde(default = "default_compact_min_tombstone_keys")]
    pub compact_min_tombstone_keys: u64,
    /// Tombstone ratio at or above which a range nominates itself for
    /// compaction.
    #[serde(default = "default_compact_tombstone_percent")]
    pub compact_tombstone_percent: f64,
    /// Leaf store tuning.
    #[serde(default)]
    pub db: DbTuning,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            checkpoint_root: default_checkpoint_root(),
            disable_wal: None,
            gc_interval_secs: default_gc_interval_secs(),
            checkpoint_idle_secs: default_checkpoint_idle_secs(),
            compact_min_tombstone_keys: default_compact_min_tombstone_keys(),
            compact_tombstone_percent: default_compact_tombstone_percent(),
            db: DbTuning::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a YAML file.
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let yaml =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, yaml).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Merge with another config (other takes precedence).
    pub fn merge(&mut self, other: EngineConfig) {
        if !other.data_root.as_os_str().is_empty() {
            self.data_root = other.data_root;
        }
        if !other.checkpoint_root.as_os_str().is_empty() {
            self.checkpoint_root = other.checkpoint_root;
        }
        if other.disable_wal.is_some() {
            self.disable_wal = other.disable_wal;
        }
        if other.gc_interval_secs > 0 {
            self.gc_interval_secs = other.gc_interval_secs;
        }
        if other.checkpoint_idle_secs > 0 {
            self.checkpoint_idle_secs = other.checkpoint_idle_secs;
        }
        if other.compact_min_tombstone_keys > 0 {
            self.compact_min_tombstone_keys = other.compact_min_tombstone_keys;
        }
        if other.compact_tombstone_percent > 0.0 {
            self.compact_tombstone_percent = other.compact_tombstone_percent;
        }
        self.db.merge(other.db);
    }

    /// Whether commits skip the write-ahead log.
    pub fn wal_disabled(&self) -> bool {
        self.disable_wal.unwrap_or(false)
    }

    /// Get the checkpoint GC period as a Duration.
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    /// Minimum age before a checkpoint becomes eligible for GC. Half the GC
    /// period, so checkpoints created just before a pass are never deleted
    /// out from under a caller that has not observed them yet.
    pub fn checkpoint_min_age(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs / 2)
    }

    /// Get the checkpoint view inactivity window as a Duration.
    pub fn checkpoint_idle(&self) -> Duration {
        Duration::from_secs(self.checkpoint_idle_secs)
    }
}

/// Leaf store tuning knobs, applied to the store and to every namespace's
/// column family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbTuning {
    /// Memtable size per column family in megabytes.
    #[serde(default = "default_write_buffer_size_mb")]
    pub write_buffer_size_mb: usize,
    /// Maximum number of memtables per column family.
    #[serde(default = "default_max_write_buffer_number")]
    pub max_write_buffer_number: i32,
    /// Target SST file size in megabytes.
    #[serde(default = "default_target_file_size_mb")]
    pub target_file_size_mb: usize,
    /// Background job parallelism of the store.
    #[serde(default = "default_max_background_jobs")]
    pub max_background_jobs: i32,
}

impl Default for DbTuning {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: default_write_buffer_size_mb(),
            max_write_buffer_number: default_max_write_buffer_number(),
            target_file_size_mb: default_target_file_size_mb(),
            max_background_jobs: default_max_background_jobs(),
        }
    }
}

impl DbTuning {
    fn merge(&mut self, other: Self) {
        if other.write_buffer_size_mb > 0 {
            self.write_buffer_size_mb = other.write_buffer_size_mb;
        }
        if other.max_write_buffer_number > 0 {
            self.max_write_buffer_number = other.max_write_buffer_number;
        }
        if other.target_file_size_mb > 0 {
            self.target_file_size_mb = other.target_file_size_mb;
        }
        if other.max_background_jobs > 0 {
            self.max_background_jobs = other.max_background_jobs;
        }
    }
}

// Default value functions

fn default_data_root() -> PathBuf {
    PathBuf::from("./data/store")
}

fn default_checkpoint_root() -> PathBuf {
    PathBuf::from("./data/checkpoints")
}

fn default_gc_interval_secs() -> u64 {
    300
}

fn default_checkpoint_idle_secs() -> u64 {
    600 // 10 minutes
}

fn default_compact_min_tombstone_keys() -> u64 {
    200_000
}

fn default_compact_tombstone_percent() -> f64 {
    0.3
}

fn default_write_buffer_size_mb() -> usize {
    64
}

fn default_max_write_buffer_number() -> i32 {
    4
}

fn default_target_file_size_mb() -> usize {
    64
}

fn default_max_background_jobs() -> i32 {
    4
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
}
