//! Mutation Queuing & Replay
//!
//! Remote-API writes that fail at the network level are captured into the
//! durable queue and answered with `202 {"queued":true}`. A replay pass
//! drains the queue oldest-first, one request at a time:
//!
//! - OK response   → record deleted, `sync-progress` with the remaining count
//! - anything else → `retryCount + 1` written back, then an exponential
//!   backoff delay before the next record
//!
//! Per-record state: `pending → succeeded (deleted) | failed (retryCount+1,
//! still pending)`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clients::{ClientDirectory, ClientMessage};
use crate::config::{ClientErrorPolicy, ReplayConfig};
use crate::error::StoreError;
use crate::fetch::{Network, Request, Response};
use crate::queue::{NewMutation, QueueStore, QueuedMutation};
use crate::sync::SyncRegistrar;

/// `min(cap, base * 2^retry_count)`, saturating.
pub fn backoff_delay(retry_count: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let factor = 2u64.saturating_pow(retry_count);
    Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
}

/// A 4xx that retrying cannot fix. 408 and 429 are transient.
pub fn is_permanent_client_error(status: u16) -> bool {
    (400..500).contains(&status) && status != 408 && status != 429
}

/// Summary of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Records read at the start of the pass.
    pub total: usize,
    pub succeeded: usize,
    /// Records dropped under [`ClientErrorPolicy::Discard`].
    pub discarded: usize,
    pub failed: usize,
    /// Records whose store transaction failed; they were skipped this pass.
    pub store_errors: usize,
    /// Backoff applied after each failed record, in pass order.
    pub backoffs: Vec<(u64, Duration)>,
    /// The pass did not run because another one was in flight.
    pub skipped: bool,
    /// The queue was empty when the pass ended and the sync tag was released.
    pub settled: bool,
}

impl ReplayReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Clears the in-flight flag even when the pass future is dropped midway.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Queues failed remote-API writes and replays them.
pub struct MutationEngine {
    store: Arc<dyn QueueStore>,
    network: Arc<dyn Network>,
    clients: Arc<ClientDirectory>,
    registrar: Arc<dyn SyncRegistrar>,
    sync_tag: String,
    config: ReplayConfig,
    in_flight: AtomicBool,
    /// Set by every enqueue; cleared when a pass starts reading the queue.
    requeued: AtomicBool,
}

impl MutationEngine {
    pub fn new(
        store: Arc<dyn QueueStore>,
        network: Arc<dyn Network>,
        clients: Arc<ClientDirectory>,
        registrar: Arc<dyn SyncRegistrar>,
        sync_tag: impl Into<String>,
        config: ReplayConfig,
    ) -> Self {
        Self {
            store,
            network,
            clients,
            registrar,
            sync_tag: sync_tag.into(),
            config,
            in_flight: AtomicBool::new(false),
            requeued: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Send a remote-API write, queueing it if the network attempt fails.
    ///
    /// Any response from the network is returned as-is. A store failure
    /// while queueing yields a network-error response.
    pub async fn send(&self, request: Request) -> Response {
        let snapshot = NewMutation::capture(&request, chrono::Utc::now().timestamp_millis());
        let err = match self.network.fetch(request).await {
            Ok(response) => return response,
            Err(e) => e,
        };
        log::debug!(
            "[sw:queue] {} {} failed ({}), queueing",
            snapshot.method,
            snapshot.url,
            err
        );
        match self.enqueue(snapshot).await {
            Ok(_) => Response::json(202, &serde_json::json!({ "queued": true })),
            Err(e) => {
                log::error!("[sw:queue] could not persist mutation: {}", e);
                Response::error()
            }
        }
    }

    /// Persist a captured mutation, notify clients and request a sync trigger.
    pub async fn enqueue(&self, record: NewMutation) -> Result<u64, StoreError> {
        let message = ClientMessage::QueuedAction {
            url: record.url.clone(),
            method: record.method,
        };
        let id = self.store.add(record).await?;
        self.requeued.store(true, Ordering::Release);
        log::info!("[sw:queue] queued mutation {}", id);
        self.clients.broadcast(&message);
        self.request_sync().await;
        Ok(id)
    }

    async fn request_sync(&self) {
        if let Err(e) = self.registrar.register(&self.sync_tag).await {
            log::warn!("[sw:queue] sync registration for {} failed: {}", self.sync_tag, e);
        }
    }

    /// Run one replay pass over every pending record.
    ///
    /// Failing to read the queue aborts the pass before any notification.
    /// Per-record store failures are counted and skipped.
    pub async fn replay(&self) -> Result<ReplayReport, StoreError> {
        if self.config.single_flight && self.in_flight.swap(true, Ordering::AcqRel) {
            log::info!("[sw:replay] pass already in flight, skipping");
            return Ok(ReplayReport::skipped());
        }
        let _guard = self.config.single_flight.then(|| PassGuard(&self.in_flight));

        self.requeued.store(false, Ordering::Release);
        let records = self.store.all().await?;
        let mut report = ReplayReport {
            total: records.len(),
            ..ReplayReport::default()
        };
        log::info!("[sw:replay] starting pass over {} records", report.total);
        self.clients
            .broadcast(&ClientMessage::SyncStart { total: report.total });

        for record in records {
            self.replay_one(record, &mut report).await;
        }

        self.clients.broadcast(&ClientMessage::SyncComplete);
        log::info!(
            "[sw:replay] pass done: {} succeeded, {} discarded, {} failed, {} store errors",
            report.succeeded,
            report.discarded,
            report.failed,
            report.store_errors
        );
        report.settled = self.release_if_drained().await;
        if !report.settled {
            self.request_sync().await;
        }
        Ok(report)
    }

    /// Release the sync tag when the live queue is empty.
    ///
    /// A record enqueued while the pass ran raises `requeued` before it
    /// registers the tag, so checking the flag again after the release
    /// catches a registration the release may have swallowed.
    async fn release_if_drained(&self) -> bool {
        if self.requeued.load(Ordering::Acquire) {
            return false;
        }
        match self.store.count().await {
            Ok(0) => {}
            Ok(_) => return false,
            Err(e) => {
                log::warn!("[sw:replay] could not count pending mutations: {}", e);
                return false;
            }
        }
        self.registrar.completed(&self.sync_tag).await;
        !self.requeued.load(Ordering::Acquire)
    }

    async fn replay_one(&self, record: QueuedMutation, report: &mut ReplayReport) {
        let outcome = self.network.fetch(record.to_request()).await;
        match outcome {
            Ok(response) if response.ok() => {
                if self.settle(record.id, report).await {
                    report.succeeded += 1;
                }
            }
            Ok(response)
                if self.config.client_error_policy == ClientErrorPolicy::Discard
                    && is_permanent_client_error(response.status) =>
            {
                log::warn!(
                    "[sw:replay] discarding mutation {} after status {}",
                    record.id,
                    response.status
                );
                if self.settle(record.id, report).await {
                    report.discarded += 1;
                }
            }
            Ok(response) => {
                if is_permanent_client_error(response.status) {
                    log::warn!(
                        "[sw:replay] mutation {} got status {}; it stays queued",
                        record.id,
                        response.status
                    );
                }
                self.defer(record, report).await;
            }
            Err(e) => {
                log::debug!("[sw:replay] mutation {} still failing: {}", record.id, e);
                self.defer(record, report).await;
            }
        }
    }

    /// Delete a finished record and report progress.
    async fn settle(&self, id: u64, report: &mut ReplayReport) -> bool {
        if let Err(e) = self.store.delete(id).await {
            log::error!("[sw:replay] could not delete mutation {}: {}", id, e);
            report.store_errors += 1;
            return false;
        }
        match self.store.count().await {
            Ok(remaining) => {
                self.clients
                    .broadcast(&ClientMessage::SyncProgress { remaining });
            }
            Err(e) => log::warn!("[sw:replay] could not count pending mutations: {}", e),
        }
        true
    }

    /// Write back the incremented retry count, then wait out the backoff.
    async fn defer(&self, mut record: QueuedMutation, report: &mut ReplayReport) {
        record.retry_count += 1;
        if let Err(e) = self.store.update(&record).await {
            log::error!("[sw:replay] could not update mutation {}: {}", record.id, e);
            report.store_errors += 1;
            return;
        }
        let delay = backoff_delay(
            record.retry_count,
            self.config.backoff_base_ms,
            self.config.backoff_cap_ms,
        );
        report.failed += 1;
        report.backoffs.push((record.id, delay));
        tokio::time::sleep(delay).await;
    }
}

// ── Tests ───────────────────────────────────────────────────
