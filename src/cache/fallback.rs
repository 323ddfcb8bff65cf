//! Last-resort responses when neither cache nor network can answer.

use std::sync::Arc;

use axum::http::StatusCode;
use metrics::counter;
use tracing::debug;
use url::Url;

use crate::application::fetch::FetchRequest;

use super::entry::CachedResponse;
use super::keys::CacheKey;
use super::store::CacheStore;

pub(crate) const METRIC_FALLBACK_TOTAL: &str = "offline_cache_fallback_total";

pub const OFFLINE_BODY: &str = "Offline - content not available";

/// Document navigations try the cached root, then the cached offline page.
/// Everything else, and exhausted navigations, get a synthetic 503.
pub struct FallbackResolver {
    store: Arc<CacheStore>,
    offline_page: String,
}

impl FallbackResolver {
    pub fn new(store: Arc<CacheStore>, offline_page: impl Into<String>) -> Self {
        Self {
            store,
            offline_page: offline_page.into(),
        }
    }

    pub async fn resolve(&self, request: &FetchRequest) -> CachedResponse {
        if request.is_navigation() {
            for path in ["/", self.offline_page.as_str()] {
                let Some(key) = same_origin_key(&request.url, path) else {
                    continue;
                };
                if let Some(shell) = self.store.get(&key).await {
                    debug!(url = %request.url, fallback = path, "serving cached shell");
                    counter!(METRIC_FALLBACK_TOTAL, "kind" => "shell").increment(1);
                    return shell;
                }
            }
        }

        debug!(url = %request.url, "no fallback cached");
        counter!(METRIC_FALLBACK_TOTAL, "kind" => "unavailable").increment(1);
        Self::unavailable()
    }

    /// The synthetic `503 Service Unavailable` response.
    pub fn unavailable() -> CachedResponse {
        CachedResponse::plain_text(StatusCode::SERVICE_UNAVAILABLE, OFFLINE_BODY)
    }
}

fn same_origin_key(url: &Url, path: &str) -> Option<CacheKey> {
    url.join(path).ok().map(|target| CacheKey::get(&target))
}

#[cfg(test)]
mod tests {
    use axum::http::header::CONTENT_TYPE;

    use super::*;
    use crate::application::fetch::Destination;
    use crate::cache::config::CacheConfig;
    use crate::cache::storage::MemoryStorage;
    use crate::domain::strategy::{RuleTable, StrategyClassifier};

    fn resolver() -> (Arc<CacheStore>, FallbackResolver) {
        let classifier = Arc::new(StrategyClassifier::new(&RuleTable::default()).unwrap());
        let store = Arc::new(CacheStore::new(
            &CacheConfig::default(),
            Arc::new(MemoryStorage::new()),
            classifier,
        ));
        let resolver = FallbackResolver::new(Arc::clone(&store), "/offline.html");
        (store, resolver)
    }

    fn navigation(path: &str) -> FetchRequest {
        FetchRequest::get(Url::parse("https://game.test").unwrap().join(path).unwrap())
            .with_destination(Destination::Document)
    }

    async fn cache(store: &CacheStore, path: &str, body: &'static str) {
        let url = Url::parse("https://game.test").unwrap().join(path).unwrap();
        store
            .put(&CacheKey::get(&url), CachedResponse::plain_text(StatusCode::OK, body))
            .await;
    }

    #[tokio::test]
    async fn empty_cache_yields_503() {
        let (_, resolver) = resolver();
        let response = resolver.resolve(&navigation("/levels/2")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.body().as_ref(), OFFLINE_BODY.as_bytes());
    }

    #[tokio::test]
    async fn navigation_prefers_cached_root() {
        let (store, resolver) = resolver();
        cache(&store, "/", "home").await;
        cache(&store, "/offline.html", "offline").await;

        let response = resolver.resolve(&navigation("/levels/2")).await;
        assert_eq!(response.body().as_ref(), b"home");
    }

    #[tokio::test]
    async fn navigation_falls_back_to_offline_page() {
        let (store, resolver) = resolver();
        cache(&store, "/offline.html", "offline").await;

        let response = resolver.resolve(&navigation("/levels/2")).await;
        assert_eq!(response.body().as_ref(), b"offline");
    }

    #[tokio::test]
    async fn subresources_never_get_the_shell() {
        let (store, resolver) = resolver();
        cache(&store, "/", "home").await;

        let request =
            FetchRequest::get(Url::parse("https://game.test/assets/images/bg.png").unwrap());
        let response = resolver.resolve(&request).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
