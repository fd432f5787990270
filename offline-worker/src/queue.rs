//! Durable Queue Store
//!
//! Holds mutation records awaiting replay. Ids are assigned by the store and
//! never reused, including across restarts of the file-backed store.
//!
//! The file store keeps one JSON document:
//!   - `nextId`: next id to assign
//!   - `records`: pending records, oldest first

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::fetch::{Request, RequestMethod};

// ── Records ─────────────────────────────────────────────────

/// One failed outbound write awaiting replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMutation {
    pub id: u64,
    /// Epoch milliseconds of the original attempt.
    pub created_at: i64,
    pub url: String,
    pub method: RequestMethod,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    #[serde(default)]
    pub retry_count: u32,
}

impl QueuedMutation {
    /// Rebuild the outbound request for replay.
    pub fn to_request(&self) -> Request {
        let mut request = Request::new(self.url.clone()).with_method(self.method);
        request.headers = self.headers.clone();
        if !self.body.is_empty() {
            request.body = Some(self.body.clone().into_bytes());
        }
        request
    }
}

/// A record before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMutation {
    pub created_at: i64,
    pub url: String,
    pub method: RequestMethod,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl NewMutation {
    /// Snapshot a request. Headers and body are copied before the request is
    /// handed to the network.
    pub fn capture(request: &Request, created_at: i64) -> Self {
        Self {
            created_at,
            url: request.url.clone(),
            method: request.method,
            headers: request.headers.clone(),
            body: request.body_text(),
        }
    }

    fn with_id(self, id: u64) -> QueuedMutation {
        QueuedMutation {
            id,
            created_at: self.created_at,
            url: self.url,
            method: self.method,
            headers: self.headers,
            body: self.body,
            retry_count: 0,
        }
    }
}

// ── Seam ────────────────────────────────────────────────────

/// Transactional record store.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a record and return its assigned id.
    async fn add(&self, record: NewMutation) -> Result<u64, StoreError>;

    /// All pending records, oldest first.
    async fn all(&self) -> Result<Vec<QueuedMutation>, StoreError>;

    /// Replace a record by id.
    async fn update(&self, record: &QueuedMutation) -> Result<(), StoreError>;

    /// Delete a record by id. Deleting a missing id is not an error.
    async fn delete(&self, id: u64) -> Result<(), StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

// ── State shared by both stores ─────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueState {
    next_id: u64,
    records: Vec<QueuedMutation>,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            next_id: 1,
            records: Vec::new(),
        }
    }
}

impl QueueState {
    fn add(&mut self, record: NewMutation) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.records.push(record.with_id(id));
        id
    }

    fn update(&mut self, record: &QueuedMutation) -> Result<(), StoreError> {
        let slot = self
            .records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or(StoreError::NotFound { id: record.id })?;
        *slot = record.clone();
        Ok(())
    }

    fn delete(&mut self, id: u64) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        self.records.len() != before
    }

    fn check(&self) -> Result<(), StoreError> {
        if let Some(max) = self.records.iter().map(|r| r.id).max() {
            if max >= self.next_id {
                return Err(StoreError::Corrupted(format!(
                    "record id {} not below nextId {}",
                    max, self.next_id
                )));
            }
        }
        Ok(())
    }
}

// ── In-memory store ─────────────────────────────────────────

/// Volatile store. Survives nothing; used by tests and hosts without disk.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    state: Mutex<QueueState>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn add(&self, record: NewMutation) -> Result<u64, StoreError> {
        Ok(self.state.lock().await.add(record))
    }

    async fn all(&self) -> Result<Vec<QueuedMutation>, StoreError> {
        Ok(self.state.lock().await.records.clone())
    }

    async fn update(&self, record: &QueuedMutation) -> Result<(), StoreError> {
        self.state.lock().await.update(record)
    }

    async fn delete(&self, id: u64) -> Result<(), StoreError> {
        self.state.lock().await.delete(id);
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().await.records.len())
    }
}

// ── File-backed store ───────────────────────────────────────

/// Store persisted to a single JSON file.
///
/// Every mutating operation rewrites the file atomically (temp file, then
/// rename) while holding the store lock, so a record is either fully written
/// or absent after a crash.
#[derive(Debug)]
pub struct JsonFileQueueStore {
    path: PathBuf,
    state: Mutex<QueueState>,
}

impl JsonFileQueueStore {
    /// Open the store at `path`, loading existing records if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let state: QueueState = serde_json::from_str(&contents)?;
                state.check()?;
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => QueueState::default(),
            Err(e) => return Err(StoreError::Io(e)),
        };
        log::debug!(
            "[sw:queue] opened {} with {} pending records",
            path.display(),
            state.records.len()
        );
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &QueueState) -> Result<(), StoreError> {
        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = dir {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for JsonFileQueueStore {
    async fn add(&self, record: NewMutation) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let id = next.add(record);
        self.persist(&next).await?;
        *state = next;
        Ok(id)
    }

    async fn all(&self) -> Result<Vec<QueuedMutation>, StoreError> {
        Ok(self.state.lock().await.records.clone())
    }

    async fn update(&self, record: &QueuedMutation) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.update(record)?;
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    async fn delete(&self, id: u64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        if next.delete(id) {
            self.persist(&next).await?;
            *state = next;
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().await.records.len())
    }
}

// ── Tests ───────────────────────────────────────────────────
