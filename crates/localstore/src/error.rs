//! Engine error types.

use std::path::PathBuf;

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the storage engine.
///
/// The engine recovers nothing internally: every failure propagates to the
/// caller, except compaction failures during shutdown which are logged and
/// swallowed so resources can still be released in order.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An API call was made before `start()` or after `stop()`.
    #[error("engine is not started")]
    NotStarted,

    /// The referenced checkpoint id has no directory on disk.
    #[error("checkpoint [{0}] not found")]
    CheckpointNotFound(String),

    /// Neither the override nor the native identity file yields a first line.
    #[error("failed to read identity under {0}")]
    IdentityUnreadable(PathBuf),

    /// The namespace is not part of the set fixed at engine creation.
    #[error("unknown namespace [{0}]")]
    UnknownNamespace(String),

    /// The batch id does not refer to an open batch.
    #[error("unknown batch [{0}]")]
    UnknownBatch(u64),

    /// A leaf store primitive failed.
    #[error("{context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: rocksdb::Error,
    },

    /// Filesystem failure outside the leaf store.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn storage(context: &'static str, source: rocksdb::Error) -> Self {
        EngineError::Storage { context, source }
    }
}
