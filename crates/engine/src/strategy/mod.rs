//! Strategy executor.
//!
//! Answers a classified GET request from cache, network or fallback. Every
//! path ends in a response: failures are converted to cached content,
//! fallback content or a terminal error body, never returned as errors.
//!
//! | Category | Strategy |
//! |---|---|
//! | static_asset | cache-first with background refresh |
//! | remote_api | network-first, offline JSON fallback |
//! | image | cache-first, placeholder fallback |
//! | navigation | network-first, offline document fallback |
//! | dynamic | stale-while-revalidate |

pub mod refresh;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use refresh::{RefreshGuard, RefreshTracker};

use crate::classify::Category;
use crate::fallback::FallbackProvider;
use crate::generations::GenerationManager;
use offsync_client::RemoteStoreClient;
use offsync_core::{Error, ResourceRequest, Response};

/// Caching strategy applied to a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    CacheFirst,
    CacheFirstWithRefresh,
    NetworkFirst,
    StaleWhileRevalidate,
    Passthrough,
}

impl Strategy {
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::StaticAsset => Strategy::CacheFirstWithRefresh,
            Category::RemoteApi | Category::Navigation => Strategy::NetworkFirst,
            Category::Image => Strategy::CacheFirst,
            Category::Dynamic => Strategy::StaleWhileRevalidate,
        }
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServedFrom {
    Network,
    Cache,
    Fallback,
    /// Terminal error body built when nothing else applied.
    Synthesized,
}

/// A response plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Served {
    pub response: Response,
    pub source: ServedFrom,
    pub category: Category,
    pub strategy: Strategy,
}

/// Why a network-first fetch did not produce a usable response.
enum NetworkFailure {
    /// The server answered with a 5xx.
    Status(Response),
    Transport(Error),
}

/// Runs caching strategies against the generation manager and the network.
#[derive(Clone)]
pub struct StrategyExecutor {
    generations: Arc<GenerationManager>,
    fallbacks: Arc<FallbackProvider>,
    remote: Arc<dyn RemoteStoreClient>,
    timeout: Duration,
    refreshes: RefreshTracker,
}

impl StrategyExecutor {
    pub fn new(
        generations: Arc<GenerationManager>, fallbacks: Arc<FallbackProvider>, remote: Arc<dyn RemoteStoreClient>,
        timeout: Duration,
    ) -> Self {
        Self { generations, fallbacks, remote, timeout, refreshes: RefreshTracker::new() }
    }

    /// Background refreshes currently running.
    pub fn refreshes_in_flight(&self) -> usize {
        self.refreshes.in_flight()
    }

    /// Serve a GET request with the strategy for `category`.
    pub async fn execute(&self, request: &ResourceRequest, category: Category) -> Served {
        let strategy = Strategy::for_category(category);
        let (response, source) = match strategy {
            Strategy::CacheFirstWithRefresh => self.cache_first(request, category, true).await,
            Strategy::CacheFirst => self.cache_first(request, category, false).await,
            Strategy::NetworkFirst => self.network_first(request, category).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
            Strategy::Passthrough => self.forward(request).await,
        };
        tracing::debug!(
            request = %request,
            category = category.as_str(),
            ?strategy,
            ?source,
            status = response.status,
            "Served request"
        );
        Served { response, source, category, strategy }
    }

    /// Forward a non-GET request untouched. Nothing is cached.
    pub async fn passthrough(&self, request: &ResourceRequest, category: Category) -> Served {
        let (response, source) = self.forward(request).await;
        Served { response, source, category, strategy: Strategy::Passthrough }
    }

    async fn forward(&self, request: &ResourceRequest) -> (Response, ServedFrom) {
        match self.fetch(request).await {
            Ok(response) => (response, ServedFrom::Network),
            Err(e) => {
                tracing::debug!(request = %request, error = %e, "Passthrough failed");
                (Response::terminal_error(503, &e.to_string()), ServedFrom::Synthesized)
            }
        }
    }

    async fn cache_first(
        &self, request: &ResourceRequest, category: Category, refresh: bool,
    ) -> (Response, ServedFrom) {
        if let Some(cached) = self.lookup(request).await {
            if refresh {
                self.spawn_refresh(request);
            }
            return (cached, ServedFrom::Cache);
        }

        let generation = self.generations.active().await;
        match self.fetch(request).await {
            Ok(response) if response.is_success() => {
                self.store(generation.as_deref(), request, &response).await;
                (response, ServedFrom::Network)
            }
            Ok(response) if category != Category::Image => (response, ServedFrom::Network),
            Ok(response) => self.fallback_or(category, response).await,
            Err(e) => self.fallback_or(category, Response::terminal_error(504, &e.to_string())).await,
        }
    }

    async fn network_first(&self, request: &ResourceRequest, category: Category) -> (Response, ServedFrom) {
        let generation = self.generations.active().await;
        let failure = match self.fetch(request).await {
            Ok(response) if response.is_success() => {
                self.store(generation.as_deref(), request, &response).await;
                return (response, ServedFrom::Network);
            }
            Ok(response) if !response.is_server_error() => return (response, ServedFrom::Network),
            Ok(response) => NetworkFailure::Status(response),
            Err(e) => NetworkFailure::Transport(e),
        };

        if let Some(cached) = self.lookup(request).await {
            return (cached, ServedFrom::Cache);
        }

        match failure {
            NetworkFailure::Status(response) => (response, ServedFrom::Network),
            NetworkFailure::Transport(e) => {
                self.fallback_or(category, Response::terminal_error(504, &e.to_string()))
                    .await
            }
        }
    }

    async fn stale_while_revalidate(&self, request: &ResourceRequest) -> (Response, ServedFrom) {
        if let Some(cached) = self.lookup(request).await {
            self.spawn_refresh(request);
            return (cached, ServedFrom::Cache);
        }

        let generation = self.generations.active().await;
        match self.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(generation.as_deref(), request, &response).await;
                }
                (response, ServedFrom::Network)
            }
            Err(e) => (Response::terminal_error(504, &e.to_string()), ServedFrom::Synthesized),
        }
    }

    async fn fallback_or(&self, category: Category, terminal: Response) -> (Response, ServedFrom) {
        match self.fallbacks.for_category(category).await {
            Some(fallback) => (fallback, ServedFrom::Fallback),
            None => (terminal, ServedFrom::Synthesized),
        }
    }

    async fn fetch(&self, request: &ResourceRequest) -> Result<Response, Error> {
        match tokio::time::timeout(self.timeout, self.remote.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(request.to_string())),
        }
    }

    /// Cached response from the active generation. Store errors count as a miss.
    async fn lookup(&self, request: &ResourceRequest) -> Option<Response> {
        match self.generations.get(request).await {
            Ok(Some(entry)) => {
                tracing::debug!(request = %request, generation = %entry.generation, "Cache hit");
                Some(entry.response)
            }
            Ok(None) => {
                tracing::debug!(request = %request, "Cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(request = %request, error = %e, "Cache read failed");
                None
            }
        }
    }

    async fn store(&self, generation: Option<&str>, request: &ResourceRequest, response: &Response) {
        let Some(generation) = generation else {
            return;
        };
        if let Err(e) = self.generations.put(generation, request, response.clone()).await {
            tracing::warn!(request = %request, error = %e, "Cache write failed");
        }
    }

    /// Start one background refresh per key. Extra calls while it runs are dropped.
    fn spawn_refresh(&self, request: &ResourceRequest) {
        let Some(guard) = self.refreshes.try_begin(&request.cache_key()) else {
            tracing::debug!(request = %request, "Refresh already in flight");
            return;
        };

        let this = self.clone();
        let request = request.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let Some(generation) = this.generations.active().await else {
                return;
            };
            match this.fetch(&request).await {
                Ok(response) if response.is_success() => {
                    this.store(Some(&generation), &request, &response).await;
                    tracing::debug!(request = %request, "Background refresh stored");
                }
                Ok(response) => {
                    tracing::debug!(request = %request, status = response.status, "Background refresh not cacheable")
                }
                Err(e) => tracing::debug!(request = %request, error = %e, "Background refresh failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeRemote, wait_until};
    use offsync_core::{CacheStore, StoreDb};
    use tokio::sync::Notify;
    use url::Url;

    const TIMEOUT: Duration = Duration::from_millis(200);

    struct Harness {
        executor: StrategyExecutor,
        generations: Arc<GenerationManager>,
        remote: Arc<FakeRemote>,
    }

    async fn harness(remote: FakeRemote) -> Harness {
        let store: Arc<dyn CacheStore> = Arc::new(StoreDb::open_in_memory().await.unwrap());
        let generations = Arc::new(GenerationManager::open(store.clone()).await.unwrap());
        let v1 = generations.create_generation("v1").await.unwrap();
        generations.activate(&v1).await.unwrap();

        let fallbacks = Arc::new(FallbackProvider::new(store));
        let remote = Arc::new(remote);
        let executor = StrategyExecutor::new(generations.clone(), fallbacks, remote.clone(), TIMEOUT);
        Harness { executor, generations, remote }
    }

    fn get(url: &str) -> ResourceRequest {
        ResourceRequest::get(Url::parse(url).unwrap())
    }

    async fn seed(h: &Harness, request: &ResourceRequest, body: &str) {
        h.generations
            .put("v1", request, Response::with_content_type(200, "text/plain", body))
            .await
            .unwrap();
    }

    async fn cached_body(h: &Harness, request: &ResourceRequest) -> Option<Vec<u8>> {
        h.generations.get(request).await.unwrap().map(|e| e.response.body)
    }

    #[tokio::test]
    async fn test_static_hit_does_not_wait_for_network() {
        let gate = Arc::new(Notify::new());
        let h = harness(FakeRemote::new().with_fetch_gate(gate)).await;
        let request = get("https://app.example.com/app.js");
        seed(&h, &request, "cached").await;

        let served = tokio::time::timeout(
            Duration::from_millis(50),
            h.executor.execute(&request, Category::StaticAsset),
        )
        .await
        .unwrap();
        assert_eq!(served.source, ServedFrom::Cache);
        assert_eq!(served.response.body, b"cached".to_vec());
    }

    #[tokio::test]
    async fn test_static_background_refresh_overwrites() {
        let h = harness(FakeRemote::new().with_page("https://app.example.com/app.js", 200, "fresh")).await;
        let request = get("https://app.example.com/app.js");
        seed(&h, &request, "stale").await;

        let served = h.executor.execute(&request, Category::StaticAsset).await;
        assert_eq!(served.response.body, b"stale".to_vec());

        wait_until(|| h.executor.refreshes_in_flight() == 0 && h.remote.fetches() == 1).await;
        assert_eq!(cached_body(&h, &request).await, Some(b"fresh".to_vec()));
    }

    #[tokio::test]
    async fn test_static_miss_fetches_and_stores() {
        let h = harness(FakeRemote::new().with_page("https://app.example.com/site.css", 200, "body{}")).await;
        let request = get("https://app.example.com/site.css");

        let served = h.executor.execute(&request, Category::StaticAsset).await;
        assert_eq!(served.source, ServedFrom::Network);
        assert_eq!(cached_body(&h, &request).await, Some(b"body{}".to_vec()));
    }

    #[tokio::test]
    async fn test_static_miss_offline_is_terminal_error() {
        let h = harness(FakeRemote::new()).await;
        let served = h.executor.execute(&get("https://app.example.com/a.js"), Category::StaticAsset).await;
        assert_eq!(served.source, ServedFrom::Synthesized);
        assert_eq!(served.response.status, 504);
    }

    #[tokio::test]
    async fn test_refresh_errors_are_swallowed() {
        let h = harness(FakeRemote::new()).await;
        let request = get("https://app.example.com/app.js");
        seed(&h, &request, "cached").await;

        h.executor.execute(&request, Category::StaticAsset).await;
        wait_until(|| h.executor.refreshes_in_flight() == 0 && h.remote.fetches() == 1).await;
        assert_eq!(cached_body(&h, &request).await, Some(b"cached".to_vec()));
    }

    #[tokio::test]
    async fn test_swr_one_refresh_per_burst() {
        let gate = Arc::new(Notify::new());
        let remote = FakeRemote::new()
            .with_page("https://cdn.example.net/feed.json", 200, "new")
            .with_fetch_gate(gate.clone());
        let h = harness(remote).await;
        let request = get("https://cdn.example.net/feed.json");
        seed(&h, &request, "old").await;

        for _ in 0..5 {
            let served = h.executor.execute(&request, Category::Dynamic).await;
            assert_eq!(served.source, ServedFrom::Cache);
            assert_eq!(served.response.body, b"old".to_vec());
        }
        assert_eq!(h.executor.refreshes_in_flight(), 1);

        gate.notify_one();
        wait_until(|| h.executor.refreshes_in_flight() == 0).await;
        assert_eq!(h.remote.fetches(), 1);
        assert_eq!(cached_body(&h, &request).await, Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_swr_miss_failure_is_terminal() {
        let h = harness(FakeRemote::new()).await;
        let served = h.executor.execute(&get("https://cdn.example.net/x"), Category::Dynamic).await;
        assert_eq!(served.response.status, 504);
        assert_eq!(served.source, ServedFrom::Synthesized);
    }

    #[tokio::test]
    async fn test_network_first_prefers_network_and_stores() {
        let h = harness(FakeRemote::new().with_page("https://api.example.com/locations", 200, "[1]")).await;
        let request = get("https://api.example.com/locations");
        seed(&h, &request, "[0]").await;

        let served = h.executor.execute(&request, Category::RemoteApi).await;
        assert_eq!(served.source, ServedFrom::Network);
        assert_eq!(served.response.body, b"[1]".to_vec());
        assert_eq!(cached_body(&h, &request).await, Some(b"[1]".to_vec()));
    }

    #[tokio::test]
    async fn test_network_first_timeout_falls_back_to_cache() {
        let gate = Arc::new(Notify::new());
        let h = harness(FakeRemote::new().with_fetch_gate(gate)).await;
        let request = get("https://api.example.com/locations");
        seed(&h, &request, "[0]").await;

        let served = h.executor.execute(&request, Category::RemoteApi).await;
        assert_eq!(served.source, ServedFrom::Cache);
        assert_eq!(served.response.body, b"[0]".to_vec());
    }

    #[tokio::test]
    async fn test_network_first_api_offline_json() {
        let h = harness(FakeRemote::new()).await;
        let served = h.executor.execute(&get("https://api.example.com/locations"), Category::RemoteApi).await;
        assert_eq!(served.source, ServedFrom::Fallback);
        assert_eq!(served.response.status, 503);
        let body: serde_json::Value = serde_json::from_slice(&served.response.body).unwrap();
        assert_eq!(body["code"], "OFFLINE");
    }

    #[tokio::test]
    async fn test_navigation_offline_document() {
        let h = harness(FakeRemote::new()).await;
        let served = h.executor.execute(&get("https://app.example.com/map"), Category::Navigation).await;
        assert_eq!(served.source, ServedFrom::Fallback);
        assert_eq!(served.response.header("content-type"), Some("text/html; charset=utf-8"));
    }

    #[tokio::test]
    async fn test_network_first_server_error_uses_cache_then_passes_through() {
        let h = harness(FakeRemote::new().with_page("https://api.example.com/a", 500, "boom")).await;
        let request = get("https://api.example.com/a");

        let served = h.executor.execute(&request, Category::RemoteApi).await;
        assert_eq!(served.response.status, 500);
        assert_eq!(served.source, ServedFrom::Network);
        assert!(cached_body(&h, &request).await.is_none());

        seed(&h, &request, "cached").await;
        let served = h.executor.execute(&request, Category::RemoteApi).await;
        assert_eq!(served.source, ServedFrom::Cache);
    }

    #[tokio::test]
    async fn test_client_errors_never_cached() {
        let h = harness(FakeRemote::new().with_page("https://api.example.com/gone", 404, "gone")).await;
        let request = get("https://api.example.com/gone");

        let served = h.executor.execute(&request, Category::RemoteApi).await;
        assert_eq!(served.response.status, 404);
        assert!(cached_body(&h, &request).await.is_none());
    }

    #[tokio::test]
    async fn test_image_placeholder_on_failure() {
        let h = harness(FakeRemote::new().with_page("https://tiles.example.org/broken.png", 500, "")).await;

        let served = h.executor.execute(&get("https://tiles.example.org/broken.png"), Category::Image).await;
        assert_eq!(served.source, ServedFrom::Fallback);
        assert_eq!(served.response.header("content-type"), Some("image/svg+xml"));

        let served = h.executor.execute(&get("https://tiles.example.org/offline.png"), Category::Image).await;
        assert_eq!(served.source, ServedFrom::Fallback);
    }

    #[tokio::test]
    async fn test_image_cache_first_no_refresh() {
        let h = harness(FakeRemote::new().with_page("https://tiles.example.org/1.png", 200, "new")).await;
        let request = get("https://tiles.example.org/1.png");
        seed(&h, &request, "old").await;

        let served = h.executor.execute(&request, Category::Image).await;
        assert_eq!(served.response.body, b"old".to_vec());
        assert_eq!(h.remote.fetches(), 0);
    }

    #[tokio::test]
    async fn test_refresh_after_supersede_is_noop() {
        let gate = Arc::new(Notify::new());
        let remote = FakeRemote::new()
            .with_page("https://app.example.com/app.js", 200, "late")
            .with_fetch_gate(gate.clone());
        let h = harness(remote).await;
        let request = get("https://app.example.com/app.js");
        seed(&h, &request, "v1").await;

        h.executor.execute(&request, Category::StaticAsset).await;
        wait_until(|| h.remote.fetches() == 1).await;

        let v2 = h.generations.create_generation("v2").await.unwrap();
        h.generations.activate(&v2).await.unwrap();

        gate.notify_one();
        wait_until(|| h.executor.refreshes_in_flight() == 0).await;
        assert!(cached_body(&h, &request).await.is_none());
        assert_eq!(h.generations.list_generations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_passthrough_never_caches() {
        let h = harness(FakeRemote::new().with_page("https://api.example.com/comments", 200, "ok")).await;
        let request = ResourceRequest::new("POST", Url::parse("https://api.example.com/comments").unwrap());

        let served = h.executor.passthrough(&request, Category::RemoteApi).await;
        assert_eq!(served.strategy, Strategy::Passthrough);
        assert_eq!(served.source, ServedFrom::Network);
        assert!(cached_body(&h, &get("https://api.example.com/comments")).await.is_none());

        let offline = harness(FakeRemote::new()).await;
        let served = offline.executor.passthrough(&request, Category::RemoteApi).await;
        assert_eq!(served.response.status, 503);
    }
}
