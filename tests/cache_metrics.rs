use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use metrics_util::debugging::DebuggingRecorder;
use url::Url;

use offline_cache::application::fetch::{Destination, FetchError, FetchRequest, Origin};
use offline_cache::application::worker::{CacheWorker, WorkerConfig};
use offline_cache::cache::{
    CacheConfig, CacheKey, CachedResponse, MemoryStorage, PartitionKind, PartitionLimits,
};
use offline_cache::domain::strategy::{RuleTable, StrategyClassifier};

struct DownOrigin;

#[async_trait]
impl Origin for DownOrigin {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse, FetchError> {
        Err(FetchError::Unreachable {
            url: request.url.to_string(),
            message: "connection refused".to_string(),
        })
    }
}

fn url(path: &str) -> Url {
    Url::parse("https://game.test").unwrap().join(path).unwrap()
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let config = WorkerConfig {
        scope: Url::parse("https://game.test").unwrap(),
        script_path: "/sw.js".to_string(),
        internal_marker: "/__offline-cache".to_string(),
        offline_page: "/offline.html".to_string(),
        skip_waiting: true,
        claim_clients: true,
        manifest: Vec::new(),
    };
    let cache = CacheConfig {
        limits: PartitionLimits {
            dynamic_bytes: 100,
            ..PartitionLimits::default()
        },
        ..CacheConfig::default()
    };
    let classifier = Arc::new(StrategyClassifier::new(&RuleTable::default()).unwrap());
    let worker = CacheWorker::new(
        config,
        &cache,
        classifier,
        Arc::new(MemoryStorage::new()),
        Arc::new(DownOrigin),
    );
    worker.start().await;
    let (_client, _events) = worker.notifier().connect();

    // Hit plus a failed background refresh.
    let engine = "/src/core/GameEngine.js";
    worker
        .store()
        .put(
            &CacheKey::get(&url(engine)),
            CachedResponse::plain_text(StatusCode::OK, "v1"),
        )
        .await;
    assert!(worker.handle_fetch(&FetchRequest::get(url(engine))).await.is_some());
    worker.settled().await;

    // Miss that ends in the synthetic fallback.
    let navigation = FetchRequest::get(url("/levels/1")).with_destination(Destination::Document);
    let fallback = worker.handle_fetch(&navigation).await.expect("intercepted");
    assert_eq!(fallback.status(), StatusCode::SERVICE_UNAVAILABLE);

    // Over budget, forcing an eviction pass.
    for index in 0..3 {
        worker
            .store()
            .put_into(
                PartitionKind::Dynamic,
                &CacheKey::get(&url(&format!("/src/scenes/{index}.js"))),
                CachedResponse::plain_text(StatusCode::OK, "y".repeat(60)),
            )
            .await;
    }

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "offline_cache_hit_total",
        "offline_cache_miss_total",
        "offline_cache_evict_total",
        "offline_cache_eviction_ms",
        "offline_cache_fallback_total",
        "offline_cache_revalidation_total",
        "offline_cache_clients",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
