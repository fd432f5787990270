//! Offline-resilience core for a web application's service worker.
//!
//! Every request the application makes passes through
//! [`ServiceWorker::on_fetch`]:
//!
//! - the [`Classifier`] picks exactly one [`Route`]
//! - GETs are served by a cache [`strategy`] (navigation, remote read,
//!   same-origin asset)
//! - remote-API writes that fail are captured into the durable [`queue`]
//!   and replayed later by the [`mutations`] engine
//!
//! Replay progress is broadcast to open pages through the
//! [`ClientDirectory`]. Host collaborators (HTTP, cache storage, record
//! store, sync registration) are injected through async traits so the core
//! runs the same in tests and in a real host.

pub mod cache;
pub mod classify;
pub mod clients;
pub mod config;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod mutations;
pub mod queue;
pub mod strategy;
pub mod sync;
pub mod worker;

pub use cache::{trim_partition, CacheKey, CacheStorage, MemoryCacheStorage};
pub use classify::{Classifier, Route};
pub use clients::{ClientDirectory, ClientInfo, ClientMessage, ClientReceiver};
pub use config::{ClientErrorPolicy, ReplayConfig, WorkerConfig};
pub use error::{CacheError, ConfigError, NetworkError, StoreError, SyncError, WorkerError};
pub use fetch::{FetchEvent, FetchOutcome, Network, Request, RequestMethod, RequestMode, Response};
pub use lifecycle::{Lifecycle, WorkerState};
pub use mutations::{backoff_delay, MutationEngine, ReplayReport};
pub use queue::{JsonFileQueueStore, MemoryQueueStore, NewMutation, QueueStore, QueuedMutation};
pub use strategy::Strategies;
pub use sync::{NetworkState, SyncRegistrar, SyncRegistry};
pub use worker::{ServiceWorker, WorkerHost};
