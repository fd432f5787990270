//! Properties 6, 7 and 8: Cache strategies
//!
//! - A failed navigation serves the cached offline page.
//! - Credentialed remote reads never touch the API partition.
//! - Stale-while-revalidate answers from cache without waiting on the
//!   network, and the refresh still lands afterwards.
//! - A full cache never costs the caller the fresh network response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use offline_worker::{
    CacheKey, CacheStorage, MemoryCacheStorage, Network, NetworkError, Request, Response,
    Strategies, WorkerConfig,
};
use tokio::sync::Notify;

struct Offline;

#[async_trait]
impl Network for Offline {
    async fn fetch(&self, _request: Request) -> Result<Response, NetworkError> {
        Err(NetworkError::Offline)
    }
}

/// Never answers.
struct Hanging;

#[async_trait]
impl Network for Hanging {
    async fn fetch(&self, _request: Request) -> Result<Response, NetworkError> {
        std::future::pending().await
    }
}

/// Answers 200 with a fixed body.
struct Fixed(&'static str);

#[async_trait]
impl Network for Fixed {
    async fn fetch(&self, _request: Request) -> Result<Response, NetworkError> {
        Ok(Response::new(200).with_body(self.0))
    }
}

/// Answers once `release` is notified.
#[derive(Default)]
struct Gated {
    release: Notify,
}

#[async_trait]
impl Network for Gated {
    async fn fetch(&self, _request: Request) -> Result<Response, NetworkError> {
        self.release.notified().await;
        Ok(Response::new(200).with_body("fresh"))
    }
}

fn strategies(network: Arc<dyn Network>, caches: Arc<MemoryCacheStorage>) -> Strategies {
    Strategies::new(network, caches, Arc::new(WorkerConfig::default()))
}

// ── Navigation fallback ─────────────────────────────────────

#[tokio::test]
async fn failed_navigation_serves_offline_page() {
    let caches = Arc::new(MemoryCacheStorage::new());
    let offline = Response::new(200).with_body("<h1>You are offline</h1>");
    caches
        .put("shell-v1", CacheKey::logical("/offline.html"), offline.clone())
        .await
        .unwrap();

    let response = strategies(Arc::new(Offline), caches)
        .navigation(Request::navigate("http://localhost/customers/12"), None)
        .await;
    assert_eq!(response, offline);
    assert!(!response.is_error());
}

#[tokio::test(start_paused = true)]
async fn navigation_timeout_serves_offline_page() {
    let caches = Arc::new(MemoryCacheStorage::new());
    let offline = Response::new(200).with_body("offline");
    caches
        .put("shell-v1", CacheKey::logical("/offline.html"), offline.clone())
        .await
        .unwrap();

    let s = strategies(Arc::new(Hanging), caches);
    let started = tokio::time::Instant::now();
    let response = s.navigation(Request::navigate("http://localhost/"), None).await;
    assert_eq!(response, offline);
    assert!(started.elapsed() >= Duration::from_millis(8000));
    assert!(started.elapsed() < Duration::from_millis(8100));
}

#[tokio::test]
async fn navigation_shell_key_is_shared_across_paths() {
    let caches = Arc::new(MemoryCacheStorage::new());
    let s = strategies(Arc::new(Fixed("<html>")), caches.clone());
    s.navigation(Request::navigate("http://localhost/a"), None).await;
    s.navigation(Request::navigate("http://localhost/b"), None).await;
    assert_eq!(
        caches.keys("shell-v1").await.unwrap(),
        vec![CacheKey::logical("/")]
    );
}

// ── No cache on auth ────────────────────────────────────────

#[tokio::test]
async fn credentialed_reads_leave_api_cache_unchanged() {
    let caches = Arc::new(MemoryCacheStorage::new());
    let s = strategies(Arc::new(Fixed(r#"[{"id":1}]"#)), caches.clone());

    s.remote_read(Request::new("https://db.test/rest/v1/public")).await;
    let before = caches.keys("api-v1").await.unwrap();

    let response = s
        .remote_read(
            Request::new("https://db.test/rest/v1/private")
                .with_header("Authorization", "Bearer user-token"),
        )
        .await;
    assert_eq!(response.text(), r#"[{"id":1}]"#);
    assert_eq!(caches.keys("api-v1").await.unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn remote_read_timeout_falls_back_to_cache() {
    let caches = Arc::new(MemoryCacheStorage::new());
    let url = "https://db.test/rest/v1/items";
    let cached = Response::new(200).with_body("cached");
    caches
        .put("api-v1", CacheKey::for_request(&Request::new(url)), cached.clone())
        .await
        .unwrap();

    let s = strategies(Arc::new(Hanging), caches);
    let started = tokio::time::Instant::now();
    assert_eq!(s.remote_read(Request::new(url)).await, cached);
    assert!(started.elapsed() >= Duration::from_millis(7000));
    assert!(started.elapsed() < Duration::from_millis(7100));
}

// ── Stale-while-revalidate ──────────────────────────────────

#[tokio::test]
async fn swr_returns_cached_while_network_pending() {
    let caches = Arc::new(MemoryCacheStorage::new());
    let url = "http://localhost/app.css";
    let key = CacheKey::for_request(&Request::new(url));
    caches
        .put("assets-v1", key.clone(), Response::new(200).with_body("stale"))
        .await
        .unwrap();

    let network = Arc::new(Gated::default());
    let s = strategies(network.clone(), caches.clone());

    let response = tokio::time::timeout(
        Duration::from_millis(50),
        s.stale_while_revalidate(Request::new(url)),
    )
    .await
    .expect("served without waiting for the network");
    assert_eq!(response.text(), "stale");

    network.release.notify_one();
    for _ in 0..100 {
        if caches.get("assets-v1", &key).await.map(|r| r.text()) == Some("fresh".to_string()) {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("background refresh never updated the cache");
}

// ── Storage full ────────────────────────────────────────────

#[tokio::test]
async fn full_storage_still_returns_fresh_remote_read() {
    let caches = Arc::new(MemoryCacheStorage::with_quota(1));
    let s = strategies(Arc::new(Fixed(r#"[{"id":9}]"#)), caches.clone());

    let response = s.remote_read(Request::new("https://db.test/rest/v1/items")).await;
    assert!(response.ok());
    assert_eq!(response.text(), r#"[{"id":9}]"#);
    assert!(caches.keys("api-v1").await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn full_storage_still_returns_fresh_asset_on_miss() {
    let caches = Arc::new(MemoryCacheStorage::with_quota(1));
    let s = strategies(Arc::new(Fixed("body{}")), caches.clone());

    let response = s
        .stale_while_revalidate(Request::new("http://localhost/app.css"))
        .await;
    assert!(response.ok());
    assert_eq!(response.text(), "body{}");
    assert_eq!(caches.usage(), 0);
}
