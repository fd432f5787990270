//! Worker Lifecycle
//!
//! State machine plus the install and activate work:
//!
//! ```text
//! Parsed → Installing → Installed → Activating → Activated
//!              ↓                        ↓            ↓
//!          Redundant                Redundant    Redundant
//! ```
//!
//! Install pre-caches the shell manifest atomically. Activate purges every
//! partition from other versions and claims open clients.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spin::Mutex;
use url::Url;

use crate::cache::{CacheKey, CacheStorage};
use crate::clients::ClientDirectory;
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::fetch::{Network, Request, Response};

/// Worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Script evaluated, nothing run yet
    Parsed,
    /// Install work in progress
    Installing,
    /// Installed, waiting for activation
    Installed,
    /// Activate work in progress
    Activating,
    /// Controlling clients
    Activated,
    /// Failed or replaced
    Redundant,
}

/// Check if a state transition is valid
fn is_valid_transition(from: WorkerState, to: WorkerState) -> bool {
    use WorkerState::*;

    matches!(
        (from, to),
        (Parsed, Installing) |
        (Installing, Installed) |
        (Installing, Redundant) |  // Install failed
        (Installed, Activating) |
        (Activating, Activated) |
        (Activating, Redundant) |  // Activate failed
        (Activated, Redundant) // Replaced by new worker
    )
}

#[derive(Debug)]
struct StateLog {
    current: WorkerState,
    history: Vec<(WorkerState, WorkerState)>,
}

/// Drives install and activation for one worker version.
pub struct Lifecycle {
    state: Mutex<StateLog>,
    network: Arc<dyn Network>,
    caches: Arc<dyn CacheStorage>,
    clients: Arc<ClientDirectory>,
    config: Arc<WorkerConfig>,
    skip_waiting_requested: AtomicBool,
    preload_supported: AtomicBool,
}

impl Lifecycle {
    pub fn new(
        network: Arc<dyn Network>,
        caches: Arc<dyn CacheStorage>,
        clients: Arc<ClientDirectory>,
        config: Arc<WorkerConfig>,
    ) -> Self {
        Self {
            state: Mutex::new(StateLog {
                current: WorkerState::Parsed,
                history: Vec::new(),
            }),
            network,
            caches,
            clients,
            config,
            skip_waiting_requested: AtomicBool::new(false),
            preload_supported: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state.lock().current
    }

    /// Every transition taken so far, in order.
    pub fn history(&self) -> Vec<(WorkerState, WorkerState)> {
        self.state.lock().history.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state() == WorkerState::Activated
    }

    /// Whether install asked to skip the waiting phase.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting_requested.load(Ordering::Acquire)
    }

    /// Record whether the host supports navigation preload.
    pub fn set_preload_supported(&self, supported: bool) {
        self.preload_supported.store(supported, Ordering::Release);
    }

    /// Navigation preload is on when configured and supported by the host,
    /// from install onwards.
    pub fn preload_enabled(&self) -> bool {
        self.config.navigation_preload
            && self.preload_supported.load(Ordering::Acquire)
            && matches!(
                self.state(),
                WorkerState::Installed | WorkerState::Activating | WorkerState::Activated
            )
    }

    fn transition(&self, to: WorkerState) -> Result<(), WorkerError> {
        let mut state = self.state.lock();
        let from = state.current;
        if !is_valid_transition(from, to) {
            return Err(WorkerError::InvalidStateTransition { from, to });
        }
        state.current = to;
        state.history.push((from, to));
        log::info!("[sw:lifecycle] {:?} -> {:?}", from, to);
        Ok(())
    }

    /// Mark the worker redundant, e.g. when a newer version took over.
    pub fn retire(&self) -> Result<(), WorkerError> {
        self.transition(WorkerState::Redundant)
    }

    // ── Install ─────────────────────────────────────────────

    /// Pre-cache the shell manifest. Either every entry is cached or none is.
    pub async fn install(&self) -> Result<(), WorkerError> {
        self.transition(WorkerState::Installing)?;
        match self.precache().await {
            Ok(()) => {
                self.transition(WorkerState::Installed)?;
                self.skip_waiting_requested.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                log::error!("[sw:lifecycle] install failed: {}", e);
                self.transition(WorkerState::Redundant)?;
                Err(e)
            }
        }
    }

    fn resolve(&self, path: &str) -> Result<String, WorkerError> {
        let base = Url::parse(&self.config.origin).map_err(|e| WorkerError::InstallFailed {
            url: self.config.origin.clone(),
            reason: e.to_string(),
        })?;
        base.join(path)
            .map(String::from)
            .map_err(|e| WorkerError::InstallFailed {
                url: path.to_string(),
                reason: e.to_string(),
            })
    }

    async fn precache(&self) -> Result<(), WorkerError> {
        let mut fetched: Vec<(CacheKey, Response)> = Vec::with_capacity(self.config.precache.len());
        for path in &self.config.precache {
            let url = self.resolve(path)?;
            let response = self
                .network
                .fetch(Request::new(url.clone()))
                .await
                .map_err(|e| WorkerError::InstallFailed {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
            if !response.ok() {
                return Err(WorkerError::InstallFailed {
                    url,
                    reason: format!("status {}", response.status),
                });
            }
            fetched.push((CacheKey::logical(path), response));
        }

        let shell = self.config.shell_cache();
        self.caches.open(&shell).await?;
        for (key, response) in fetched {
            if let Err(e) = self.caches.put(&shell, key, response).await {
                if let Err(cleanup) = self.caches.delete_partition(&shell).await {
                    log::warn!("[sw:lifecycle] could not drop partial {}: {}", shell, cleanup);
                }
                return Err(e.into());
            }
        }
        log::debug!(
            "[sw:lifecycle] precached {} entries into {}",
            self.config.precache.len(),
            shell
        );
        Ok(())
    }

    // ── Activate ────────────────────────────────────────────

    /// Purge stale partitions, take over, claim clients.
    pub async fn activate(&self) -> Result<(), WorkerError> {
        self.transition(WorkerState::Activating)?;
        if let Err(e) = self.migrate_caches().await {
            log::error!("[sw:lifecycle] activate failed: {}", e);
            self.transition(WorkerState::Redundant)?;
            return Err(e);
        }
        self.transition(WorkerState::Activated)?;
        let claimed = self.clients.claim();
        log::info!("[sw:lifecycle] claimed {} clients", claimed);
        Ok(())
    }

    async fn migrate_caches(&self) -> Result<(), WorkerError> {
        let current = self.config.cache_names();
        for name in self.caches.partition_names().await {
            if !current.contains(&name) {
                log::info!("[sw:lifecycle] deleting stale cache {}", name);
                self.caches.delete_partition(&name).await?;
            }
        }
        for name in &current {
            self.caches.open(name).await?;
        }
        Ok(())
    }

    /// Force activation of a waiting worker.
    pub async fn skip_waiting(&self) -> Result<(), WorkerError> {
        let from = self.state();
        if from != WorkerState::Installed {
            return Err(WorkerError::InvalidStateTransition {
                from,
                to: WorkerState::Activating,
            });
        }
        self.activate().await
    }
}

// ── Tests ───────────────────────────────────────────────────
