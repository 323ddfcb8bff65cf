mod middleware;
mod proxy;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use url::Url;

use crate::application::fetch::Origin;
use crate::application::worker::CacheWorker;

use middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub worker: Arc<CacheWorker>,
    pub origin: Arc<dyn Origin>,
    /// Incoming paths are resolved against this URL before forwarding.
    pub base_url: Url,
}

impl HttpState {
    pub fn new(worker: Arc<CacheWorker>, origin: Arc<dyn Origin>) -> Self {
        let base_url = worker.config().scope.clone();
        Self {
            worker,
            origin,
            base_url,
        }
    }
}

/// The host surface: internal endpoints under the worker's marker, everything
/// else through the intercepting proxy.
pub fn build_router(state: HttpState) -> Router {
    let marker = state.worker.config().internal_marker.clone();

    let internal = Router::new()
        .route("/message", post(proxy::post_message))
        .route("/events", get(proxy::events))
        .route("/status", get(proxy::status));

    Router::new()
        .nest(&marker, internal)
        .fallback(proxy::proxy)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
