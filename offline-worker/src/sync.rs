//! Background Sync
//!
//! Registration of future replay triggers:
//! - `SyncRegistrar::register(tag)`: ask the host for a sync trigger
//! - On an offline → online transition, registered tags are handed back for
//!   dispatch
//! - A tag stays registered until a replay pass leaves nothing pending, at
//!   which point `SyncRegistrar::completed(tag)` releases it

use std::collections::BTreeMap;

use async_trait::async_trait;
use spin::Mutex;

use crate::error::SyncError;

// ── Seam ────────────────────────────────────────────────────

/// Requests a future sync trigger from the host.
#[async_trait]
pub trait SyncRegistrar: Send + Sync {
    async fn register(&self, tag: &str) -> Result<(), SyncError>;

    /// A replay pass for `tag` left the queue empty. Hosts whose native
    /// sync primitive retires tags on its own keep the default no-op.
    async fn completed(&self, _tag: &str) {}
}

// ── Types ───────────────────────────────────────────────────

/// Network connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    /// Connected to network.
    Online,
    /// No network connectivity.
    Offline,
}

/// A registered sync tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTask {
    pub tag: String,
    /// How many times the tag was (re-)registered since it last completed.
    pub registrations: u32,
    /// How many times the tag was handed out for dispatch.
    pub dispatches: u32,
}

#[derive(Debug)]
struct RegistryState {
    tasks: BTreeMap<String, SyncTask>,
    network_state: NetworkState,
}

/// In-process sync registry.
///
/// Hosts with a native background-sync primitive forward its events to the
/// worker directly; hosts without one feed connectivity changes into
/// [`SyncRegistry::update_network_state`] instead.
#[derive(Debug)]
pub struct SyncRegistry {
    state: Mutex<RegistryState>,
    supported: bool,
}

impl Default for SyncRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncRegistry {
    /// Create a registry that accepts registrations, starting online.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                tasks: BTreeMap::new(),
                network_state: NetworkState::Online,
            }),
            supported: true,
        }
    }

    /// A registry for hosts without background sync: every registration is
    /// rejected with [`SyncError::Unsupported`].
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// All registered tags.
    pub fn tags(&self) -> Vec<String> {
        self.state.lock().tasks.keys().cloned().collect()
    }

    pub fn task(&self, tag: &str) -> Option<SyncTask> {
        self.state.lock().tasks.get(tag).cloned()
    }

    /// Drop a tag whose work is finished.
    pub fn complete(&self, tag: &str) -> bool {
        self.state.lock().tasks.remove(tag).is_some()
    }

    /// Current network state.
    pub fn network_state(&self) -> NetworkState {
        self.state.lock().network_state
    }

    /// Record a connectivity change. On Offline → Online returns the tags to
    /// dispatch; otherwise returns nothing.
    pub fn update_network_state(&self, network_state: NetworkState) -> Vec<String> {
        let mut state = self.state.lock();
        let came_online =
            state.network_state == NetworkState::Offline && network_state == NetworkState::Online;
        state.network_state = network_state;
        if !came_online {
            return Vec::new();
        }
        state
            .tasks
            .values_mut()
            .map(|task| {
                task.dispatches += 1;
                task.tag.clone()
            })
            .collect()
    }
}

#[async_trait]
impl SyncRegistrar for SyncRegistry {
    async fn register(&self, tag: &str) -> Result<(), SyncError> {
        if !self.supported {
            return Err(SyncError::Unsupported);
        }
        let mut state = self.state.lock();
        state
            .tasks
            .entry(tag.to_string())
            .or_insert_with(|| SyncTask {
                tag: tag.to_string(),
                registrations: 0,
                dispatches: 0,
            })
            .registrations += 1;
        Ok(())
    }

    async fn completed(&self, tag: &str) {
        if SyncRegistry::complete(self, tag) {
            log::debug!("[sw:replay] sync tag {} released", tag);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────
