//! Fetch strategies.
//!
//! | Class        | Strategy                                         |
//! |--------------|--------------------------------------------------|
//! | StaticAsset  | cache-first (network-first for dev markup/code)  |
//! | ApiData      | network-first, cache fallback, `{}` for i18n     |
//! | Navigation   | network, cached entry document fallback          |
//! | Unhandled    | pass-through                                     |

use std::sync::Arc;

use tracing::{debug, trace, warn};

use guidecache_core::{Generation, GuideConfig};

use crate::cache::CacheStore;
use crate::classify::{AssetClassifier, RequestClass};
use crate::fetch::{cache_key, FetchRequest, FetchResponse, Fetcher};
use crate::{FetchError, Result, ServiceWorkerError};

/// Body of the terminal response for a static asset.
pub const ASSET_OFFLINE_BODY: &str = "Asset not available offline";

/// Body of the terminal response for a navigation.
pub const APP_OFFLINE_BODY: &str = "App offline";

/// What the worker does with an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Answer with this response.
    Respond(FetchResponse),
    /// Let the request go to the network untouched.
    Passthrough,
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&FetchResponse> {
        match self {
            Self::Respond(response) => Some(response),
            Self::Passthrough => None,
        }
    }
}

/// The strategies of one generation.
pub struct FetchStrategies {
    classifier: AssetClassifier,
    generation: Generation,
    /// Entry document keys tried by the navigation fallback, in order.
    entry_documents: Vec<String>,
    store: CacheStore,
    fetcher: Arc<dyn Fetcher>,
}

impl FetchStrategies {
    pub fn new(config: &GuideConfig, store: CacheStore, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let entry_documents = ["index.html", "/"]
            .iter()
            .map(|path| -> Result<String> { Ok(cache_key(&config.resolve(path)?)) })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            classifier: AssetClassifier::from_config(config)?,
            generation: config.current_generation(),
            entry_documents,
            store,
            fetcher,
        })
    }

    pub fn classifier(&self) -> &AssetClassifier {
        &self.classifier
    }

    /// Classify a request and run the matching strategy.
    pub async fn handle(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        let class = self.classifier.classify(request);
        debug!(url = %request.url, class = ?class, "Fetch");

        let response = match class {
            RequestClass::StaticAsset => self.cache_first(request).await,
            RequestClass::ApiData => self.network_first(request).await?,
            RequestClass::Navigation => self.navigation_fallback(request).await,
            RequestClass::Unhandled => return Ok(FetchOutcome::Passthrough),
        };
        Ok(FetchOutcome::Respond(response))
    }

    /// Static partition first; network on a miss. Development markup and
    /// code go to the network first so edits show up immediately.
    pub async fn cache_first(&self, request: &FetchRequest) -> FetchResponse {
        if self.classifier.is_dev_bypass(request) {
            return self.dev_network_first(request).await;
        }

        let key = request.cache_key();
        let partition = self.generation.static_partition();

        if let Some(cached) = self.store.match_in(&partition, &key).await {
            trace!(key = %key, "Cache hit");
            return cached;
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    self.store.put(&partition, &key, &response).await;
                }
                response
            }
            Err(err) => {
                warn!(key = %key, error = %err, "Static fetch failed");
                self.cached_or_unavailable(&key).await
            }
        }
    }

    async fn dev_network_first(&self, request: &FetchRequest) -> FetchResponse {
        let key = request.cache_key();
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    self.store
                        .put(&self.generation.static_partition(), &key, &response)
                        .await;
                }
                response
            }
            Err(err) => {
                debug!(key = %key, error = %err, "Dev fetch failed, trying cache");
                self.cached_or_unavailable(&key).await
            }
        }
    }

    async fn cached_or_unavailable(&self, key: &str) -> FetchResponse {
        match self.store.match_any(key).await {
            Some(cached) => cached,
            None => FetchResponse::unavailable(ASSET_OFFLINE_BODY),
        }
    }

    /// Network first, refreshing the api partition; cache on failure.
    pub async fn network_first(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let key = request.cache_key();

        let failure = match self.fetcher.fetch(request).await {
            Ok(response) if response.is_ok() => {
                self.store
                    .put(&self.generation.api_partition(), &key, &response)
                    .await;
                return Ok(response);
            }
            Ok(response) => FetchError::Status(response.status),
            Err(err) => err,
        };

        debug!(key = %key, error = %failure, "Network failed, trying cache");
        if let Some(cached) = self.store.match_any(&key).await {
            return Ok(cached);
        }

        if self.classifier.is_translation(request) {
            debug!(key = %key, "Serving empty translations");
            return Ok(FetchResponse::json("{}"));
        }

        warn!(key = %key, error = %failure, "API data unavailable");
        Err(ServiceWorkerError::from(failure))
    }

    /// Network; the cached entry document when offline.
    pub async fn navigation_fallback(&self, request: &FetchRequest) -> FetchResponse {
        match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(err) => {
                debug!(url = %request.url, error = %err, "Navigation offline");
                for key in &self.entry_documents {
                    if let Some(cached) = self.store.match_any(key).await {
                        return cached;
                    }
                }
                FetchResponse::unavailable(APP_OFFLINE_BODY)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::JSON_CONTENT_TYPE;
    use crate::testing::ScriptedFetcher;
    use url::Url;

    const SCOPE: &str = "https://guide.example/";

    fn config(scope: &str) -> GuideConfig {
        let mut config = GuideConfig::for_scope("app", Url::parse(scope).unwrap());
        config.static_assets = vec!["index.html".into()];
        config.api_endpoints = vec!["data/events.json".into()];
        config
    }

    fn setup(scope: &str) -> (FetchStrategies, CacheStore, Arc<ScriptedFetcher>) {
        let store = CacheStore::new();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let strategies = FetchStrategies::new(&config(scope), store.clone(), fetcher.clone()).unwrap();
        (strategies, store, fetcher)
    }

    fn get(url: &str) -> FetchRequest {
        FetchRequest::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_cache_first_miss_then_hit() {
        let (strategies, store, fetcher) = setup(SCOPE);
        let url = "https://guide.example/assets/logo.png";
        fetcher.route(url, FetchResponse::ok("PNG"));

        let first = strategies.cache_first(&get(url)).await;
        assert!(!first.from_cache);
        assert!(store.match_in("app-static-v1", url).await.is_some());

        let second = strategies.cache_first(&get(url)).await;
        assert!(second.from_cache);
        assert_eq!(second.body, b"PNG");
        assert_eq!(fetcher.call_count(url), 1);
    }

    #[tokio::test]
    async fn test_cache_first_does_not_store_errors() {
        let (strategies, store, _fetcher) = setup(SCOPE);
        let url = "https://guide.example/assets/missing.png";

        let response = strategies.cache_first(&get(url)).await;
        assert_eq!(response.status, 404);
        assert!(store.match_any(url).await.is_none());
    }

    #[tokio::test]
    async fn test_cache_first_offline_falls_back() {
        let (strategies, store, fetcher) = setup(SCOPE);
        fetcher.set_online(false);

        let url = "https://guide.example/assets/photo.jpg";
        let response = strategies.cache_first(&get(url)).await;
        assert_eq!(response.status, 503);
        assert_eq!(response.text(), ASSET_OFFLINE_BODY);

        // Present in another partition only: found by the fallback re-check.
        store.put("app-static-dev", url, &FetchResponse::ok("JPG")).await;
        let response = strategies.cache_first(&get(url)).await;
        assert_eq!(response.body, b"JPG");
    }

    #[tokio::test]
    async fn test_dev_mode_goes_to_network_for_scripts() {
        let (strategies, store, fetcher) = setup("http://localhost:8080/");
        let url = "http://localhost:8080/js/app.js";
        store.put("app-static-dev", url, &FetchResponse::ok("old")).await;
        fetcher.route(url, FetchResponse::ok("new"));

        let response = strategies.cache_first(&get(url)).await;
        assert_eq!(response.body, b"new");
        assert_eq!(store.match_in("app-static-dev", url).await.unwrap().body, b"new");

        fetcher.set_online(false);
        let response = strategies.cache_first(&get(url)).await;
        assert!(response.from_cache);
        assert_eq!(response.body, b"new");
    }

    #[tokio::test]
    async fn test_dev_mode_images_stay_cache_first() {
        let (strategies, store, fetcher) = setup("http://localhost:8080/");
        let url = "http://localhost:8080/assets/floorplan.png";
        store.put("app-static-dev", url, &FetchResponse::ok("cached")).await;

        let response = strategies.cache_first(&get(url)).await;
        assert!(response.from_cache);
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_network_first_error_status_uses_cache() {
        let (strategies, store, fetcher) = setup(SCOPE);
        let url = "https://guide.example/data/events.json";
        store.put("app-api-v1", url, &FetchResponse::json("[1]")).await;
        fetcher.route(url, FetchResponse::new(500, "Internal Server Error", ""));

        let response = strategies.network_first(&get(url)).await.unwrap();
        assert!(response.from_cache);
        assert_eq!(response.body, b"[1]");
    }

    #[tokio::test]
    async fn test_network_first_without_cache_propagates() {
        let (strategies, _store, fetcher) = setup(SCOPE);
        fetcher.set_online(false);

        let result = strategies
            .network_first(&get("https://guide.example/data/stations.json"))
            .await;
        assert!(matches!(result, Err(ServiceWorkerError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_navigation_prefers_network() {
        let (strategies, store, fetcher) = setup(SCOPE);
        store
            .put("app-static-v1", "https://guide.example/index.html", &FetchResponse::ok("cached"))
            .await;
        fetcher.route(
            "https://guide.example/agenda",
            FetchResponse::new(404, "Not Found", "nope"),
        );

        let request = FetchRequest::navigate(Url::parse("https://guide.example/agenda").unwrap());
        let response = strategies.navigation_fallback(&request).await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_navigation_offline_root_then_unavailable() {
        let (strategies, store, fetcher) = setup(SCOPE);
        fetcher.set_online(false);
        let request = FetchRequest::navigate(Url::parse("https://guide.example/agenda").unwrap());

        let response = strategies.navigation_fallback(&request).await;
        assert_eq!(response.status, 503);
        assert_eq!(response.text(), APP_OFFLINE_BODY);

        store
            .put("app-static-v1", "https://guide.example/", &FetchResponse::ok("root"))
            .await;
        let response = strategies.navigation_fallback(&request).await;
        assert_eq!(response.body, b"root");
    }

    #[tokio::test]
    async fn test_handle_dispatch() {
        let (strategies, _store, _fetcher) = setup(SCOPE);

        let post = get("https://guide.example/data/events.json").with_method("POST");
        assert_eq!(strategies.handle(&post).await.unwrap(), FetchOutcome::Passthrough);

        let outcome = strategies
            .handle(&get("https://guide.example/data/i18n/it.json"))
            .await
            .unwrap();
        let response = outcome.response().unwrap();
        assert_eq!(response.body, b"{}");
        assert_eq!(response.header("content-type"), Some(JSON_CONTENT_TYPE));
    }
}
