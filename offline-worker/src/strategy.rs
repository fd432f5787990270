//! Cache Strategies
//!
//! One strategy per route:
//!
//! - **Navigation**: network-first (preload or bounded fetch); OK responses
//!   refresh the shell entry, failures fall back to the offline page.
//! - **Remote read**: network-first with a bounded fetch; falls back to the
//!   cached copy. Requests carrying credentials are never written.
//! - **Same-origin asset**: stale-while-revalidate; the refresh runs detached
//!   from the response.

use std::sync::Arc;

use crate::cache::{trim_partition_quietly, CacheKey, CacheStorage};
use crate::config::WorkerConfig;
use crate::fetch::{fetch_with_timeout, Network, Request, Response};
use url::Url;

/// Response-producing strategies over shared network and cache seams.
pub struct Strategies {
    network: Arc<dyn Network>,
    caches: Arc<dyn CacheStorage>,
    config: Arc<WorkerConfig>,
}

impl Strategies {
    pub fn new(
        network: Arc<dyn Network>,
        caches: Arc<dyn CacheStorage>,
        config: Arc<WorkerConfig>,
    ) -> Self {
        Self {
            network,
            caches,
            config,
        }
    }

    /// Serve a page navigation.
    ///
    /// Any received response is returned, even a non-OK one. Only OK
    /// responses replace the shell entry.
    pub async fn navigation(&self, request: Request, preload: Option<Response>) -> Response {
        let url = request.url.clone();
        let result = match preload {
            Some(response) => {
                log::debug!("[sw:fetch] using preload response for {}", url);
                Ok(response)
            }
            None => {
                fetch_with_timeout(&*self.network, request, self.config.navigation_timeout()).await
            }
        };

        let shell = self.config.shell_cache();
        match result {
            Ok(response) => {
                if response.ok() {
                    let key = CacheKey::logical(&self.config.shell_cache_key);
                    if let Err(e) = self.caches.put(&shell, key, response.clone()).await {
                        log::warn!("[sw:cache] could not refresh shell: {}", e);
                    }
                }
                response
            }
            Err(e) => {
                log::info!("[sw:fetch] navigation to {} failed ({}), serving offline page", url, e);
                let fallback = CacheKey::logical(&self.config.offline_fallback);
                match self.caches.get(&shell, &fallback).await {
                    Some(page) => page,
                    None => {
                        log::warn!("[sw:cache] offline page missing from {}", shell);
                        Response::error()
                    }
                }
            }
        }
    }

    /// Serve a remote-API read.
    pub async fn remote_read(&self, request: Request) -> Response {
        let key = CacheKey::for_request(&request);
        let credentialed = request.has_authorization();
        let api = self.config.api_cache();
        let cached = self.caches.get(&api, &key).await;

        match fetch_with_timeout(&*self.network, request, self.config.api_timeout()).await {
            Ok(response) => {
                if response.ok() && !credentialed {
                    match self.caches.put(&api, key, response.clone()).await {
                        Ok(()) => {
                            trim_partition_quietly(&*self.caches, &api, self.config.max_api_entries)
                                .await
                        }
                        Err(e) => log::warn!("[sw:cache] could not store API response: {}", e),
                    }
                }
                response
            }
            Err(e) => {
                log::debug!("[sw:fetch] {} unavailable ({}), trying cache", key, e);
                cached.unwrap_or_else(Response::error)
            }
        }
    }

    /// Serve a same-origin asset from cache, refreshing it in the background.
    ///
    /// A copy precached at install counts as cached. With no cached copy the
    /// caller waits for the refresh itself.
    pub async fn stale_while_revalidate(&self, request: Request) -> Response {
        let key = CacheKey::for_request(&request);
        let assets = self.config.asset_cache();
        let cached = match self.caches.get(&assets, &key).await {
            Some(response) => Some(response),
            None => self.precached(&request.url).await,
        };

        let network = self.network.clone();
        let caches = self.caches.clone();
        let max = self.config.max_asset_entries;
        let refresh = tokio::spawn(async move {
            let response = network.fetch(request).await?;
            if response.ok() {
                match caches.put(&assets, key, response.clone()).await {
                    Ok(()) => trim_partition_quietly(&*caches, &assets, max).await,
                    Err(e) => log::warn!("[sw:cache] could not store asset: {}", e),
                }
            }
            Ok::<_, crate::error::NetworkError>(response)
        });

        if let Some(response) = cached {
            return response;
        }
        match refresh.await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                log::debug!("[sw:fetch] asset fetch failed: {}", e);
                Response::error()
            }
            Err(e) => {
                log::error!("[sw:fetch] asset refresh task failed: {}", e);
                Response::error()
            }
        }
    }

    /// Install-time copy of an asset, stored in the shell partition under
    /// its path.
    async fn precached(&self, url: &str) -> Option<Response> {
        let path = Url::parse(url).ok()?.path().to_string();
        self.caches
            .get(&self.config.shell_cache(), &CacheKey::logical(&path))
            .await
    }
}

// ── Tests ───────────────────────────────────────────────────
