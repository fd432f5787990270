//! Service worker entry points.
//!
//! [`ServiceWorker`] wires the classifier, strategies, mutation engine and
//! lifecycle together and exposes one async handler per host trigger.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::cache::CacheStorage;
use crate::classify::{Classifier, Route};
use crate::clients::ClientDirectory;
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::fetch::{FetchEvent, FetchOutcome, Network};
use crate::lifecycle::{Lifecycle, WorkerState};
use crate::mutations::{MutationEngine, ReplayReport};
use crate::queue::QueueStore;
use crate::strategy::Strategies;
use crate::sync::{NetworkState, SyncRegistrar, SyncRegistry};

/// Collaborators supplied by the host environment.
#[derive(Clone)]
pub struct WorkerHost {
    pub network: Arc<dyn Network>,
    pub caches: Arc<dyn CacheStorage>,
    pub store: Arc<dyn QueueStore>,
    pub registrar: Arc<dyn SyncRegistrar>,
    /// Connectivity tracking for hosts without a native sync trigger.
    pub connectivity: Option<Arc<SyncRegistry>>,
}

impl WorkerHost {
    /// Host whose sync tags live in an in-process [`SyncRegistry`] that
    /// also replays them when connectivity returns.
    pub fn with_registry(
        network: Arc<dyn Network>,
        caches: Arc<dyn CacheStorage>,
        store: Arc<dyn QueueStore>,
        registry: Arc<SyncRegistry>,
    ) -> Self {
        Self {
            network,
            caches,
            store,
            registrar: registry.clone(),
            connectivity: Some(registry),
        }
    }
}

/// Command posted to the worker by a page or the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum HostCommand {
    SkipWaiting,
    SyncNow,
    QueueSize,
}

pub struct ServiceWorker {
    config: Arc<WorkerConfig>,
    classifier: Classifier,
    strategies: Strategies,
    mutations: MutationEngine,
    lifecycle: Lifecycle,
    clients: Arc<ClientDirectory>,
    connectivity: Option<Arc<SyncRegistry>>,
}

impl ServiceWorker {
    /// Build a worker from a validated configuration.
    pub fn new(config: WorkerConfig, host: WorkerHost) -> Result<Self, WorkerError> {
        config.validate()?;
        let config = Arc::new(config);
        let clients = Arc::new(ClientDirectory::new());
        Ok(Self {
            classifier: Classifier::from_config(&config),
            strategies: Strategies::new(host.network.clone(), host.caches.clone(), config.clone()),
            mutations: MutationEngine::new(
                host.store,
                host.network.clone(),
                clients.clone(),
                host.registrar,
                config.sync_tag.clone(),
                config.replay.clone(),
            ),
            lifecycle: Lifecycle::new(host.network, host.caches, clients.clone(), config.clone()),
            clients,
            connectivity: host.connectivity,
            config,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn clients(&self) -> &Arc<ClientDirectory> {
        &self.clients
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    // ── Lifecycle events ────────────────────────────────────

    pub async fn on_install(&self) -> Result<(), WorkerError> {
        self.lifecycle.install().await
    }

    pub async fn on_activate(&self) -> Result<(), WorkerError> {
        self.lifecycle.activate().await
    }

    // ── Fetch ───────────────────────────────────────────────

    /// Handle an intercepted request. A worker that is not active leaves
    /// every request to the host.
    pub async fn on_fetch(&self, event: FetchEvent) -> FetchOutcome {
        if !self.lifecycle.is_active() {
            return FetchOutcome::Passthrough;
        }
        let route = self.classifier.classify(&event.request);
        log::debug!(
            "[sw:fetch] {} {} -> {:?}",
            event.request.method,
            event.request.url,
            route
        );
        let response = match route {
            Route::RemoteMutation => self.mutations.send(event.request).await,
            Route::Navigation => {
                let preload = event
                    .preload_response
                    .filter(|_| self.lifecycle.preload_enabled());
                self.strategies.navigation(event.request, preload).await
            }
            Route::RemoteRead => self.strategies.remote_read(event.request).await,
            Route::SameOriginAsset => self.strategies.stale_while_revalidate(event.request).await,
            Route::Unhandled => return FetchOutcome::Passthrough,
        };
        FetchOutcome::Respond(response)
    }

    // ── Sync ────────────────────────────────────────────────

    /// Run a replay pass for a sync trigger. Tags other than the configured
    /// one are ignored. The engine releases the tag once the queue is empty.
    pub async fn on_sync(&self, tag: &str) -> Result<Option<ReplayReport>, WorkerError> {
        if tag != self.config.sync_tag {
            log::debug!("[sw:replay] ignoring sync tag {}", tag);
            return Ok(None);
        }
        Ok(Some(self.mutations.replay().await?))
    }

    /// Feed a connectivity change. Coming back online replays every tag
    /// registered in the meantime. Without connectivity tracking the host's
    /// own sync trigger drives replay and this is a no-op.
    pub async fn on_network_state(
        &self,
        state: NetworkState,
    ) -> Result<Vec<ReplayReport>, WorkerError> {
        let Some(connectivity) = &self.connectivity else {
            log::debug!("[sw:replay] no connectivity tracking; ignoring {:?}", state);
            return Ok(Vec::new());
        };
        let mut reports = Vec::new();
        for tag in connectivity.update_network_state(state) {
            if let Some(report) = self.on_sync(&tag).await? {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    // ── Messages ────────────────────────────────────────────

    /// Handle a JSON command such as `{"type":"SKIP_WAITING"}`. Returns the
    /// reply payload, if the command has one.
    pub async fn on_message(&self, message: &str) -> Result<Option<Value>, WorkerError> {
        let command: HostCommand =
            serde_json::from_str(message).map_err(|e| WorkerError::Message(e.to_string()))?;
        match command {
            HostCommand::SkipWaiting => {
                self.lifecycle.skip_waiting().await?;
                Ok(None)
            }
            HostCommand::SyncNow => {
                let report = self.on_sync(&self.config.sync_tag).await?.unwrap_or_default();
                Ok(Some(json!({
                    "total": report.total,
                    "succeeded": report.succeeded,
                    "discarded": report.discarded,
                    "failed": report.failed,
                    "skipped": report.skipped,
                    "settled": report.settled,
                })))
            }
            HostCommand::QueueSize => {
                let size = self.mutations.store().count().await?;
                Ok(Some(json!({ "size": size })))
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::error::NetworkError;
    use crate::fetch::{Request, RequestMethod, Response};
    use crate::queue::MemoryQueueStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Network with an on/off switch; online requests get 200.
    #[derive(Default)]
    struct Switch(AtomicBool);

    impl Switch {
        fn set_online(&self, online: bool) {
            self.0.store(online, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Network for Switch {
        async fn fetch(&self, request: Request) -> Result<Response, NetworkError> {
            if self.0.load(Ordering::SeqCst) {
                Ok(Response::new(200).with_body(request.url))
            } else {
                Err(NetworkError::Offline)
            }
        }
    }

    async fn active_worker() -> (ServiceWorker, Arc<Switch>, Arc<SyncRegistry>) {
        let network = Arc::new(Switch::default());
        let registry = Arc::new(SyncRegistry::new());
        network.set_online(true);
        let worker = ServiceWorker::new(
            WorkerConfig::default(),
            WorkerHost::with_registry(
                network.clone(),
                Arc::new(MemoryCacheStorage::new()),
                Arc::new(MemoryQueueStore::new()),
                registry.clone(),
            ),
        )
        .unwrap();
        worker.on_install().await.unwrap();
        worker.on_activate().await.unwrap();
        (worker, network, registry)
    }

    fn mutation() -> FetchEvent {
        FetchEvent::new(
            Request::new("https://db.test/rest/v1/orders")
                .with_method(RequestMethod::Post)
                .with_body("{}"),
        )
    }

    #[tokio::test]
    async fn inactive_worker_passes_through() {
        let worker = ServiceWorker::new(
            WorkerConfig::default(),
            WorkerHost::with_registry(
                Arc::new(Switch::default()),
                Arc::new(MemoryCacheStorage::new()),
                Arc::new(MemoryQueueStore::new()),
                Arc::new(SyncRegistry::new()),
            ),
        )
        .unwrap();
        let outcome = worker
            .on_fetch(FetchEvent::new(Request::new("http://localhost/app.js")))
            .await;
        assert_eq!(outcome, FetchOutcome::Passthrough);
    }

    #[tokio::test]
    async fn cross_origin_asset_passes_through() {
        let (worker, _, _) = active_worker().await;
        let outcome = worker
            .on_fetch(FetchEvent::new(Request::new("https://cdn.test/lib.js")))
            .await;
        assert_eq!(outcome, FetchOutcome::Passthrough);
    }

    #[tokio::test]
    async fn queue_size_message() {
        let (worker, network, _) = active_worker().await;
        network.set_online(false);
        worker.on_fetch(mutation()).await;
        let reply = worker.on_message(r#"{"type":"QUEUE_SIZE"}"#).await.unwrap();
        assert_eq!(reply, Some(json!({ "size": 1 })));
    }

    #[tokio::test]
    async fn sync_now_drains_queue() {
        let (worker, network, registry) = active_worker().await;
        network.set_online(false);
        worker.on_fetch(mutation()).await;
        network.set_online(true);

        let reply = worker.on_message(r#"{"type":"SYNC_NOW"}"#).await.unwrap().unwrap();
        assert_eq!(reply["succeeded"], 1);
        assert_eq!(reply["settled"], true);
        assert!(registry.tags().is_empty());
    }

    #[tokio::test]
    async fn unknown_message_is_rejected() {
        let (worker, _, _) = active_worker().await;
        assert!(matches!(
            worker.on_message(r#"{"type":"REBOOT"}"#).await,
            Err(WorkerError::Message(_))
        ));
        assert!(matches!(
            worker.on_message("not json").await,
            Err(WorkerError::Message(_))
        ));
    }

    #[tokio::test]
    async fn foreign_sync_tag_is_ignored() {
        let (worker, _, _) = active_worker().await;
        assert_eq!(worker.on_sync("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn reconnect_replays_registered_tags() {
        let (worker, network, _) = active_worker().await;
        network.set_online(false);
        worker.on_network_state(NetworkState::Offline).await.unwrap();
        worker.on_fetch(mutation()).await;

        network.set_online(true);
        let reports = worker.on_network_state(NetworkState::Online).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].succeeded, 1);
        assert_eq!(worker.on_message(r#"{"type":"QUEUE_SIZE"}"#).await.unwrap(), Some(json!({ "size": 0 })));
    }

    #[tokio::test]
    async fn offline_asset_served_from_install_copy() {
        let (worker, network, _) = active_worker().await;
        network.set_online(false);
        let outcome = worker
            .on_fetch(FetchEvent::new(Request::new("http://localhost/logo.png")))
            .await;
        assert_eq!(
            outcome,
            FetchOutcome::Respond(Response::new(200).with_body("http://localhost/logo.png"))
        );
    }

    /// Registrar that records every call and keeps no tags of its own.
    #[derive(Default)]
    struct Recording {
        calls: spin::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SyncRegistrar for Recording {
        async fn register(&self, tag: &str) -> Result<(), crate::error::SyncError> {
            self.calls.lock().push(format!("register {tag}"));
            Ok(())
        }

        async fn completed(&self, tag: &str) {
            self.calls.lock().push(format!("completed {tag}"));
        }
    }

    #[tokio::test]
    async fn host_registrar_drives_sync() {
        let network = Arc::new(Switch::default());
        let registrar = Arc::new(Recording::default());
        let worker = ServiceWorker::new(
            WorkerConfig::default(),
            WorkerHost {
                network: network.clone(),
                caches: Arc::new(MemoryCacheStorage::new()),
                store: Arc::new(MemoryQueueStore::new()),
                registrar: registrar.clone(),
                connectivity: None,
            },
        )
        .unwrap();
        network.set_online(true);
        worker.on_install().await.unwrap();
        worker.on_activate().await.unwrap();

        network.set_online(false);
        worker.on_fetch(mutation()).await;
        // Connectivity is the host's business here.
        assert!(worker.on_network_state(NetworkState::Online).await.unwrap().is_empty());

        network.set_online(true);
        let report = worker.on_sync("sync-mutations").await.unwrap().unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(report.settled);
        assert_eq!(
            *registrar.calls.lock(),
            vec![
                "register sync-mutations".to_string(),
                "completed sync-mutations".to_string(),
            ]
        );
    }

    /// `/a` answers after 100ms once `a_up` is set; everything else is offline.
    #[derive(Default)]
    struct SlowA {
        a_up: AtomicBool,
    }

    #[async_trait]
    impl Network for SlowA {
        async fn fetch(&self, request: Request) -> Result<Response, NetworkError> {
            if request.url.ends_with("/a") && self.a_up.load(Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                return Ok(Response::new(201));
            }
            Err(NetworkError::Offline)
        }
    }

    fn write(path: &str) -> FetchEvent {
        FetchEvent::new(
            Request::new(format!("https://db.test/rest/v1/{path}"))
                .with_method(RequestMethod::Post)
                .with_body("{}"),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn write_during_sync_replays_on_reconnect() {
        let network = Arc::new(SlowA::default());
        let registry = Arc::new(SyncRegistry::new());
        let config = WorkerConfig {
            precache: Vec::new(),
            ..WorkerConfig::default()
        };
        let worker = ServiceWorker::new(
            config,
            WorkerHost::with_registry(
                network.clone(),
                Arc::new(MemoryCacheStorage::new()),
                Arc::new(MemoryQueueStore::new()),
                registry.clone(),
            ),
        )
        .unwrap();
        worker.on_install().await.unwrap();
        worker.on_activate().await.unwrap();

        worker.on_fetch(write("a")).await;
        network.a_up.store(true, Ordering::SeqCst);
        let (report, _) = tokio::join!(worker.on_sync("sync-mutations"), async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            worker.on_fetch(write("b")).await
        });
        let report = report.unwrap().unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(!report.settled);
        assert_eq!(
            worker.on_message(r#"{"type":"QUEUE_SIZE"}"#).await.unwrap(),
            Some(json!({ "size": 1 }))
        );
        assert_eq!(registry.tags(), vec!["sync-mutations".to_string()]);

        worker.on_network_state(NetworkState::Offline).await.unwrap();
        let reports = worker.on_network_state(NetworkState::Online).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].total, 1);
    }
}
