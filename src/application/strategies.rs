//! The five per-resource caching strategies.
//!
//! Every strategy produces a response. Network and storage failures are
//! absorbed here and never reach the caller.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::application::fetch::{FetchRequest, Origin};
use crate::cache::{CacheStore, CachedResponse, FallbackResolver, RevalidationWorker};
use crate::domain::strategy::Strategy;

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    Cache,
    Network,
    Fallback,
}

impl ServedFrom {
    pub fn as_str(self) -> &'static str {
        match self {
            ServedFrom::Cache => "cache",
            ServedFrom::Network => "network",
            ServedFrom::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Served {
    pub response: CachedResponse,
    pub from: ServedFrom,
}

impl Served {
    fn cache(response: CachedResponse) -> Self {
        Self {
            response,
            from: ServedFrom::Cache,
        }
    }

    fn network(response: CachedResponse) -> Self {
        Self {
            response,
            from: ServedFrom::Network,
        }
    }

    fn fallback(response: CachedResponse) -> Self {
        Self {
            response,
            from: ServedFrom::Fallback,
        }
    }
}

#[derive(Clone)]
pub struct StrategyExecutor {
    store: Arc<CacheStore>,
    origin: Arc<dyn Origin>,
    revalidation: RevalidationWorker,
    fallback: Arc<FallbackResolver>,
}

impl StrategyExecutor {
    pub fn new(
        store: Arc<CacheStore>,
        origin: Arc<dyn Origin>,
        revalidation: RevalidationWorker,
        fallback: Arc<FallbackResolver>,
    ) -> Self {
        Self {
            store,
            origin,
            revalidation,
            fallback,
        }
    }

    pub fn revalidation(&self) -> &RevalidationWorker {
        &self.revalidation
    }

    #[instrument(skip_all, fields(strategy = strategy.as_str(), url = %request.url))]
    pub async fn execute(&self, strategy: Strategy, request: &FetchRequest) -> Served {
        let served = match strategy {
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::NetworkOnly => self.network_only(request).await,
            Strategy::CacheOnly => self.cache_only(request).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
        };
        debug!(
            outcome = served.from.as_str(),
            status = served.response.status().as_u16(),
            "served request"
        );
        served
    }

    /// Cached copy if present, refreshed in the background.
    async fn cache_first(&self, request: &FetchRequest) -> Served {
        if let Some(hit) = self.store.get(&request.key()).await {
            self.revalidation
                .spawn(request.without_validators(), "cache-first");
            return Served::cache(hit);
        }
        self.fetch_and_store(request).await
    }

    async fn network_first(&self, request: &FetchRequest) -> Served {
        match self.origin.fetch(request).await {
            Ok(response) if response.status().is_success() => {
                self.store_if_cacheable(request, &response).await;
                Served::network(response)
            }
            Ok(response) => {
                debug!(status = %response.status(), "origin answered with an error status");
                match self.store.get(&request.key()).await {
                    Some(hit) => Served::cache(hit),
                    None => Served::network(response),
                }
            }
            Err(err) => {
                debug!(error = %err, "network failed, trying cache");
                match self.store.get(&request.key()).await {
                    Some(hit) => Served::cache(hit),
                    None => Served::fallback(self.fallback.resolve(request).await),
                }
            }
        }
    }

    async fn network_only(&self, request: &FetchRequest) -> Served {
        match self.origin.fetch(request).await {
            Ok(response) => Served::network(response),
            Err(err) => {
                debug!(error = %err, "network failed");
                Served::fallback(self.fallback.resolve(request).await)
            }
        }
    }

    async fn cache_only(&self, request: &FetchRequest) -> Served {
        match self.store.get(&request.key()).await {
            Some(hit) => Served::cache(hit),
            None => Served::fallback(self.fallback.resolve(request).await),
        }
    }

    /// Serve the cached copy at once and refresh it in the background. A miss
    /// waits for the network.
    async fn stale_while_revalidate(&self, request: &FetchRequest) -> Served {
        if let Some(hit) = self.store.get(&request.key()).await {
            self.revalidation
                .spawn(request.without_validators(), "stale-while-revalidate");
            return Served::cache(hit);
        }
        self.fetch_and_store(request).await
    }

    /// Miss path shared by cache-first and stale-while-revalidate. The
    /// client's validators are dropped so a stored entry is never a 304 or a
    /// partial body.
    async fn fetch_and_store(&self, request: &FetchRequest) -> Served {
        let request = &request.without_validators();
        match self.origin.fetch(request).await {
            Ok(response) => {
                self.store_if_cacheable(request, &response).await;
                Served::network(response)
            }
            Err(err) => {
                debug!(error = %err, "network failed on cache miss");
                Served::fallback(self.fallback.resolve(request).await)
            }
        }
    }

    async fn store_if_cacheable(&self, request: &FetchRequest, response: &CachedResponse) {
        if response.is_cacheable() {
            self.store.put(&request.key(), response.clone()).await;
        }
    }
}
