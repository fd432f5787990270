//! Error types for the offline worker.
//!
//! Each seam (network, cache, queue store, sync registration, config) has its
//! own error enum; [`WorkerError`] wraps them for the event entry points.

use crate::lifecycle::WorkerState;

/// Failure of an outbound fetch.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("network unreachable")]
    Offline,

    #[error("network timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("fetch failed: {0}")]
    Failed(String),
}

/// Failure of a cache partition operation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache partition not found")]
    NotFound,

    #[error("cache quota exceeded")]
    QuotaExceeded,

    #[error("cache storage error: {0}")]
    Storage(String),
}

/// Failure of a durable queue store transaction.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("queued mutation not found: {id}")]
    NotFound { id: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("queue store corrupted: {0}")]
    Corrupted(String),
}

/// Failure to request a future sync trigger.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("background sync not supported by host")]
    Unsupported,

    #[error("sync registration rejected: {0}")]
    Rejected(String),
}

/// Invalid or unreadable configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML: {0}")]
    Toml(String),

    #[error("invalid config field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level error surfaced by the worker's event handlers.
#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid lifecycle transition {from:?} -> {to:?}")]
    InvalidStateTransition { from: WorkerState, to: WorkerState },

    #[error("install failed on {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("malformed host message: {0}")]
    Message(String),
}
