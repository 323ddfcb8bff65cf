use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream;
use axum::{
    Json,
    body::Bytes,
    extract::{Request, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use http_body_util::{BodyExt, Limited};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::error::HttpError;
use crate::application::fetch::{Destination, FetchRequest};
use crate::cache::ClientNotifier;

use super::HttpState;

const SOURCE: &str = "infra::http::proxy";

/// Largest request body buffered for forwarding.
const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

/// Every request outside the internal marker lands here: the worker answers
/// what it intercepts, the rest is forwarded untouched.
pub(super) async fn proxy(State(state): State<HttpState>, request: Request) -> Response {
    let fetch = match fetch_request(&state, request).await {
        Ok(fetch) => fetch,
        Err(err) => return err.into_response(),
    };

    if let Some(response) = state.worker.handle_fetch(&fetch).await {
        return response.into_response();
    }

    match state.origin.fetch(&fetch).await {
        Ok(response) => response.into_response(),
        Err(err) => HttpError::from_error(
            SOURCE,
            StatusCode::BAD_GATEWAY,
            "Origin unavailable",
            &err,
        )
        .into_response(),
    }
}

async fn fetch_request(state: &HttpState, request: Request) -> Result<FetchRequest, HttpError> {
    let (parts, body) = request.into_parts();
    let mut url = state.base_url.clone();
    url.set_path(parts.uri.path());
    url.set_query(parts.uri.query());
    url.set_fragment(None);
    if url.origin() != state.base_url.origin() {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Invalid request target",
            format!("{url} is outside {}", state.base_url),
        ));
    }

    let body = Limited::new(body, MAX_REQUEST_BODY)
        .collect()
        .await
        .map_err(|err| {
            HttpError::new(
                SOURCE,
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body rejected",
                err.to_string(),
            )
        })?
        .to_bytes();

    let mut fetch = FetchRequest::new(parts.method, url)
        .with_destination(Destination::from_headers(&parts.headers));
    fetch.headers = parts.headers;
    fetch.body = body;
    Ok(fetch)
}

/// `POST {marker}/message`: a client command, answered inline when it has a reply.
pub(super) async fn post_message(State(state): State<HttpState>, body: Bytes) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(err) => {
            return HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Malformed message",
                &err,
            )
            .into_response();
        }
    };

    let (reply, port) = oneshot::channel();
    state.worker.handle_message(raw, Some(reply)).await;
    match port.await {
        Ok(message) => Json(message).into_response(),
        Err(_) => StatusCode::NO_CONTENT.into_response(),
    }
}

/// `GET {marker}/status`
pub(super) async fn status(State(state): State<HttpState>) -> Response {
    Json(state.worker.status().await).into_response()
}

/// `GET {marker}/events`: a client connection receiving worker broadcasts.
pub(super) async fn events(State(state): State<HttpState>) -> Response {
    let notifier = Arc::clone(state.worker.notifier());
    let (id, mut messages) = notifier.connect();
    let connection = Connection { notifier, id };

    let stream = stream! {
        let _connection = connection;
        while let Some(message) = messages.recv().await {
            match Event::default().event(message.kind()).json_data(&message) {
                Ok(event) => yield Ok::<Event, Infallible>(event),
                Err(err) => warn!(target = SOURCE, client = %id, error = %err, "failed to encode event"),
            }
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Unregisters the client when its event stream is dropped.
struct Connection {
    notifier: Arc<ClientNotifier>,
    id: Uuid,
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.notifier.disconnect(self.id) {
            debug!(target = SOURCE, client = %self.id, "event stream closed");
        }
    }
}
