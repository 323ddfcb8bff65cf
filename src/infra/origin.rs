//! `Origin` over HTTP, backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{
    HeaderMap, HeaderValue,
    header::{self, HeaderName},
};
use reqwest::Client;
use tracing::debug;

use crate::application::fetch::{FetchError, FetchRequest, Origin};
use crate::cache::CachedResponse;

use super::error::InfraError;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Clone, Debug)]
pub struct HttpOrigin {
    client: Client,
}

impl HttpOrigin {
    pub fn new(timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::origin(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn user_agent() -> &'static str {
        concat!("offline-cache/", env!("CARGO_PKG_VERSION"))
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse, FetchError> {
        let url = request.url.to_string();
        let mut outgoing = forwardable(&request.headers);
        outgoing.remove(header::CONTENT_LENGTH);
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(outgoing)
            .body(request.body.clone())
            .send()
            .await
            .map_err(|err| classify(&url, err))?;

        let status = response.status();
        let mut headers = forwardable(response.headers());
        let body = response.bytes().await.map_err(|err| FetchError::Body {
            url: url.clone(),
            message: err.to_string(),
        })?;
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "origin responded");
        Ok(CachedResponse::new(status, headers, body))
    }
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in &HOP_BY_HOP {
        forwarded.remove(name);
    }
    forwarded
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Unreachable {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}
