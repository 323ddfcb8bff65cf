//! Captured HTTP responses and their cache metadata.

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::Response,
};
use bytes::Bytes;
use time::OffsetDateTime;

/// Synthetic header carrying the write time in unix milliseconds.
pub const CACHE_TIMESTAMP_HEADER: &str = "cache-timestamp";

/// Size assumed for entries without a usable `content-length`.
pub const FALLBACK_ENTRY_SIZE: u64 = 10 * 1024;

/// A fully buffered response: status, headers and body.
///
/// Values are immutable once stored; updates replace the whole entry.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// A `text/plain` response with an accurate `content-length`.
    pub fn plain_text(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Only `200 OK` responses are written to the cache.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK
    }

    /// Return a copy carrying `cache-timestamp` for the given instant.
    pub fn stamped(mut self, at: OffsetDateTime) -> Self {
        let millis = at.unix_timestamp_nanos() / 1_000_000;
        if let Ok(value) = HeaderValue::from_str(&millis.to_string()) {
            self.headers.insert(CACHE_TIMESTAMP_HEADER, value);
        }
        self
    }

    /// When this entry was written, if it carries a readable stamp.
    pub fn timestamp(&self) -> Option<OffsetDateTime> {
        let millis: i128 = self
            .headers
            .get(CACHE_TIMESTAMP_HEADER)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()?;
        OffsetDateTime::from_unix_timestamp_nanos(millis.checked_mul(1_000_000)?).ok()
    }

    /// Write time in unix milliseconds; unstamped entries count as oldest.
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp()
            .map(|at| (at.unix_timestamp_nanos() / 1_000_000) as i64)
            .unwrap_or(0)
    }

    /// Budget size derived from `content-length`.
    pub fn size(&self) -> u64 {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(FALLBACK_ENTRY_SIZE)
    }

    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
