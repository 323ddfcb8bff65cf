//! Background revalidation with request collapsing.
//!
//! A refresh is a detached `tokio::spawn`. The response path never joins it;
//! each task logs its own outcome. At most one refresh per key is in flight,
//! later requests for the same key are counted and skipped.

use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashSet;
use metrics::counter;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::application::fetch::{FetchRequest, Origin};

use super::keys::CacheKey;
use super::store::CacheStore;

pub(crate) const METRIC_REVALIDATION_TOTAL: &str = "offline_cache_revalidation_total";

/// How a background refresh ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidationOutcome {
    /// The origin answered 200 and the entry was replaced.
    Updated,
    /// The origin answered, but not with 200. The old entry stays.
    Kept,
    /// The origin answered 200 but the write failed.
    NotStored,
    /// The origin could not be reached.
    Failed,
}

impl RevalidationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RevalidationOutcome::Updated => "updated",
            RevalidationOutcome::Kept => "kept",
            RevalidationOutcome::NotStored => "not_stored",
            RevalidationOutcome::Failed => "failed",
        }
    }
}

#[derive(Clone)]
pub struct RevalidationWorker {
    inner: Arc<Inner>,
}

struct Inner {
    origin: Arc<dyn Origin>,
    store: Arc<CacheStore>,
    in_flight: DashSet<CacheKey>,
    idle: Notify,
    collapsed: AtomicU64,
}

/// Releases the key even if the refresh task panics.
struct InFlight {
    inner: Arc<Inner>,
    key: CacheKey,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.key);
        if self.inner.in_flight.is_empty() {
            self.inner.idle.notify_waiters();
        }
    }
}

impl RevalidationWorker {
    pub fn new(origin: Arc<dyn Origin>, store: Arc<CacheStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                origin,
                store,
                in_flight: DashSet::new(),
                idle: Notify::new(),
                collapsed: AtomicU64::new(0),
            }),
        }
    }

    /// Start a detached refresh. Returns `false` when one is already running
    /// for the same key.
    pub fn spawn(&self, request: FetchRequest, reason: &'static str) -> bool {
        let key = request.key();
        if !self.inner.in_flight.insert(key.clone()) {
            self.inner.collapsed.fetch_add(1, Ordering::Relaxed);
            counter!(METRIC_REVALIDATION_TOTAL, "outcome" => "collapsed").increment(1);
            debug!(key = %key, reason, "revalidation already in flight");
            return false;
        }

        let guard = InFlight {
            inner: Arc::clone(&self.inner),
            key,
        };
        tokio::spawn(async move {
            let outcome = guard.inner.refresh(&request).await;
            counter!(METRIC_REVALIDATION_TOTAL, "outcome" => outcome.as_str()).increment(1);
            match outcome {
                RevalidationOutcome::Updated | RevalidationOutcome::Kept => {
                    info!(key = %guard.key, reason, outcome = outcome.as_str(), "revalidation finished");
                }
                RevalidationOutcome::NotStored | RevalidationOutcome::Failed => {
                    warn!(key = %guard.key, reason, outcome = outcome.as_str(), "revalidation finished");
                }
            }
            drop(guard);
        });
        true
    }

    /// Number of refreshes currently in flight.
    pub fn active(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Refresh requests skipped because one was already in flight.
    pub fn collapsed(&self) -> u64 {
        self.inner.collapsed.load(Ordering::Relaxed)
    }

    /// Wait until no refresh is in flight.
    pub async fn settled(&self) {
        loop {
            let mut notified = pin!(self.inner.idle.notified());
            notified.as_mut().enable();
            if self.inner.in_flight.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl Inner {
    async fn refresh(&self, request: &FetchRequest) -> RevalidationOutcome {
        match self.origin.fetch(request).await {
            Ok(response) if response.is_cacheable() => {
                if self.store.put(&request.key(), response).await {
                    RevalidationOutcome::Updated
                } else {
                    RevalidationOutcome::NotStored
                }
            }
            Ok(response) => {
                debug!(url = %request.url, status = %response.status(), "origin declined revalidation");
                RevalidationOutcome::Kept
            }
            Err(err) => {
                debug!(url = %request.url, error = %err, "revalidation fetch failed");
                RevalidationOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::http::StatusCode;
    use tokio::sync::Semaphore;
    use url::Url;

    use super::*;
    use crate::application::fetch::FetchError;
    use crate::cache::config::CacheConfig;
    use crate::cache::entry::CachedResponse;
    use crate::cache::storage::MemoryStorage;
    use crate::domain::strategy::{RuleTable, StrategyClassifier};

    /// Origin that answers only after a permit is released.
    struct GatedOrigin {
        gate: Semaphore,
        status: StatusCode,
    }

    #[async_trait]
    impl Origin for GatedOrigin {
        async fn fetch(&self, _request: &FetchRequest) -> Result<CachedResponse, FetchError> {
            let _permit = self.gate.acquire().await.expect("gate open");
            Ok(CachedResponse::plain_text(self.status, "fresh"))
        }
    }

    fn worker(status: StatusCode) -> (Arc<GatedOrigin>, Arc<CacheStore>, RevalidationWorker) {
        let origin = Arc::new(GatedOrigin {
            gate: Semaphore::new(0),
            status,
        });
        let classifier = Arc::new(StrategyClassifier::new(&RuleTable::default()).unwrap());
        let store = Arc::new(CacheStore::new(
            &CacheConfig::default(),
            Arc::new(MemoryStorage::new()),
            classifier,
        ));
        let worker = RevalidationWorker::new(origin.clone(), Arc::clone(&store));
        (origin, store, worker)
    }

    fn request() -> FetchRequest {
        FetchRequest::get(Url::parse("https://game.test/src/core/Loop.js").unwrap())
    }

    #[tokio::test]
    async fn collapses_concurrent_refreshes_of_one_key() {
        let (origin, store, worker) = worker(StatusCode::OK);

        assert!(worker.spawn(request(), "test"));
        assert!(!worker.spawn(request(), "test"));
        assert_eq!(worker.collapsed(), 1);
        assert_eq!(worker.active(), 1);

        origin.gate.add_permits(1);
        tokio::time::timeout(Duration::from_secs(5), worker.settled())
            .await
            .expect("settles");

        assert_eq!(worker.active(), 0);
        let hit = store.get(&request().key()).await.expect("refreshed");
        assert_eq!(hit.body().as_ref(), b"fresh");
    }

    #[tokio::test]
    async fn non_ok_refresh_keeps_existing_entry() {
        let (origin, store, worker) = worker(StatusCode::INTERNAL_SERVER_ERROR);
        store
            .put(&request().key(), CachedResponse::plain_text(StatusCode::OK, "v1"))
            .await;

        worker.spawn(request(), "test");
        origin.gate.add_permits(1);
        worker.settled().await;

        let hit = store.get(&request().key()).await.expect("kept");
        assert_eq!(hit.body().as_ref(), b"v1");
    }

    #[tokio::test]
    async fn settled_returns_immediately_when_idle() {
        let (_, _, worker) = worker(StatusCode::OK);
        tokio::time::timeout(Duration::from_millis(100), worker.settled())
            .await
            .expect("idle worker is settled");
    }
}
