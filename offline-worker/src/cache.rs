//! Cache Partitions
//!
//! Named, versioned (request → response) containers behind the
//! [`CacheStorage`] seam, plus the count-bounded FIFO eviction shared by the
//! asset and API partitions.
//!
//! Entries keep insertion order. `put` on an existing key removes the old
//! entry and appends the new one, so a refreshed entry becomes the newest.
//! Reads never reorder entries.

use std::collections::BTreeMap;

use async_trait::async_trait;
use spin::Mutex;

use crate::error::CacheError;
use crate::fetch::{Request, RequestMethod, Response};

// ── Keys ────────────────────────────────────────────────────

/// Cache key: method plus URL, or a fixed logical path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub method: RequestMethod,
    pub url: String,
}

impl CacheKey {
    pub fn for_request(request: &Request) -> Self {
        Self {
            method: request.method,
            url: request.url.clone(),
        }
    }

    /// A fixed key that does not depend on the request URL.
    pub fn logical(path: &str) -> Self {
        Self {
            method: RequestMethod::Get,
            url: path.to_string(),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

// ── Seam ────────────────────────────────────────────────────

/// Partition manager.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open (or create) a named partition.
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    async fn has(&self, name: &str) -> bool;

    /// Delete a whole partition. Returns whether it existed.
    async fn delete_partition(&self, name: &str) -> Result<bool, CacheError>;

    async fn partition_names(&self) -> Vec<String>;

    async fn get(&self, name: &str, key: &CacheKey) -> Option<Response>;

    /// Store an entry, creating the partition if needed.
    async fn put(&self, name: &str, key: CacheKey, response: Response) -> Result<(), CacheError>;

    /// Keys of a partition, oldest first.
    async fn keys(&self, name: &str) -> Result<Vec<CacheKey>, CacheError>;

    /// Delete one entry. Returns whether it existed.
    async fn delete(&self, name: &str, key: &CacheKey) -> Result<bool, CacheError>;
}

// ── In-memory storage ───────────────────────────────────────

/// A cached request/response pair.
#[derive(Debug, Clone)]
struct CacheEntry {
    key: CacheKey,
    response: Response,
    size: usize,
}

/// One named partition; `entries` is ordered oldest first.
#[derive(Debug, Default)]
struct Partition {
    entries: Vec<CacheEntry>,
    total_size: usize,
}

impl Partition {
    fn position(&self, key: &CacheKey) -> Option<usize> {
        self.entries.iter().position(|e| &e.key == key)
    }

    fn remove(&mut self, key: &CacheKey) -> bool {
        match self.position(key) {
            Some(idx) => {
                let old = self.entries.remove(idx);
                self.total_size = self.total_size.saturating_sub(old.size);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    partitions: BTreeMap<String, Partition>,
    total_size: usize,
}

/// Process-local [`CacheStorage`] with an optional byte quota across all
/// partitions.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    inner: Mutex<Inner>,
    quota: Option<usize>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that rejects writes once `bytes` would be exceeded.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            quota: Some(bytes),
        }
    }

    /// Total bytes stored across partitions.
    pub fn usage(&self) -> usize {
        self.inner.lock().total_size
    }
}

fn entry_size(key: &CacheKey, response: &Response) -> usize {
    let headers: usize = response
        .headers
        .iter()
        .map(|(k, v)| k.len() + v.len())
        .sum();
    key.url.len() + headers + response.body.len()
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.inner
            .lock()
            .partitions
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> bool {
        self.inner.lock().partitions.contains_key(name)
    }

    async fn delete_partition(&self, name: &str) -> Result<bool, CacheError> {
        let mut inner = self.inner.lock();
        match inner.partitions.remove(name) {
            Some(partition) => {
                inner.total_size = inner.total_size.saturating_sub(partition.total_size);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn partition_names(&self) -> Vec<String> {
        self.inner.lock().partitions.keys().cloned().collect()
    }

    async fn get(&self, name: &str, key: &CacheKey) -> Option<Response> {
        let inner = self.inner.lock();
        let partition = inner.partitions.get(name)?;
        partition
            .entries
            .iter()
            .find(|e| &e.key == key)
            .map(|e| e.response.clone())
    }

    async fn put(&self, name: &str, key: CacheKey, response: Response) -> Result<(), CacheError> {
        let size = entry_size(&key, &response);
        let mut inner = self.inner.lock();

        let replaced = inner
            .partitions
            .get(name)
            .and_then(|p| p.position(&key).map(|idx| p.entries[idx].size))
            .unwrap_or(0);
        if let Some(quota) = self.quota {
            if inner.total_size - replaced + size > quota {
                return Err(CacheError::QuotaExceeded);
            }
        }

        let partition = inner.partitions.entry(name.to_string()).or_default();
        partition.remove(&key);
        partition.entries.push(CacheEntry {
            key,
            response,
            size,
        });
        partition.total_size += size;
        inner.total_size = inner.total_size - replaced + size;
        Ok(())
    }

    async fn keys(&self, name: &str) -> Result<Vec<CacheKey>, CacheError> {
        let inner = self.inner.lock();
        let partition = inner.partitions.get(name).ok_or(CacheError::NotFound)?;
        Ok(partition.entries.iter().map(|e| e.key.clone()).collect())
    }

    async fn delete(&self, name: &str, key: &CacheKey) -> Result<bool, CacheError> {
        let mut inner = self.inner.lock();
        let partition = match inner.partitions.get_mut(name) {
            Some(p) => p,
            None => return Ok(false),
        };
        let before = partition.total_size;
        let removed = partition.remove(key);
        let freed = before - partition.total_size;
        inner.total_size = inner.total_size.saturating_sub(freed);
        Ok(removed)
    }
}

// ── Eviction ────────────────────────────────────────────────

/// Delete the oldest `count - max` entries of a partition. Returns how many
/// were evicted.
pub async fn trim_partition(
    storage: &dyn CacheStorage,
    name: &str,
    max: usize,
) -> Result<usize, CacheError> {
    let keys = storage.keys(name).await?;
    if keys.len() <= max {
        return Ok(0);
    }
    let excess = keys.len() - max;
    for key in &keys[..excess] {
        storage.delete(name, key).await?;
    }
    log::debug!("[sw:cache] trimmed {} entries from {}", excess, name);
    Ok(excess)
}

/// Best-effort variant of [`trim_partition`]: failures are logged only.
pub async fn trim_partition_quietly(storage: &dyn CacheStorage, name: &str, max: usize) {
    if let Err(e) = trim_partition(storage, name, max).await {
        log::warn!("[sw:cache] eviction on {} failed: {}", name, e);
    }
}

// ── Tests ───────────────────────────────────────────────────
