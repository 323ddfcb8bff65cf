//! Intercepted requests and the origin they are ultimately served from.

use async_trait::async_trait;
use axum::http::{
    HeaderMap, Method,
    header::{
        ACCEPT, HeaderName, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE,
        IF_UNMODIFIED_SINCE, RANGE,
    },
};
use bytes::Bytes;
use thiserror::Error;
use url::Url;

use crate::cache::{CacheKey, CachedResponse};

const SEC_FETCH_DEST: HeaderName = HeaderName::from_static("sec-fetch-dest");

/// Headers that let the origin answer with something other than a full body.
const PARTIAL_RESPONSE_HEADERS: [HeaderName; 6] = [
    IF_NONE_MATCH,
    IF_MODIFIED_SINCE,
    IF_MATCH,
    IF_UNMODIFIED_SINCE,
    IF_RANGE,
    RANGE,
];

/// What kind of resource the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Document,
    Script,
    Style,
    Image,
    Font,
    Audio,
    Video,
    Manifest,
    Empty,
    Other,
}

impl Destination {
    pub fn from_sec_fetch_dest(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Destination::Document,
            "script" | "worker" | "sharedworker" | "serviceworker" => Destination::Script,
            "style" => Destination::Style,
            "image" => Destination::Image,
            "font" => Destination::Font,
            "audio" => Destination::Audio,
            "video" | "track" => Destination::Video,
            "manifest" => Destination::Manifest,
            "empty" | "" => Destination::Empty,
            _ => Destination::Other,
        }
    }

    /// Derive the destination from request headers.
    ///
    /// Clients without `Sec-Fetch-Dest` are treated as navigations when they
    /// accept HTML.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        if let Some(dest) = headers.get(SEC_FETCH_DEST).and_then(|v| v.to_str().ok()) {
            return Self::from_sec_fetch_dest(dest);
        }
        let accepts_html = headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html"));
        if accepts_html {
            Destination::Document
        } else {
            Destination::Empty
        }
    }
}

/// An intercepted request, buffered.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            destination: Destination::Empty,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(&self.method, &self.url)
    }

    /// The same request without the client's validators or range, so the
    /// origin answers with a complete body that can be stored.
    pub fn without_validators(&self) -> Self {
        let mut request = self.clone();
        for name in &PARTIAL_RESPONSE_HEADERS {
            request.headers.remove(name);
        }
        request
    }

    /// Document navigations get the cached-shell fallback chain.
    pub fn is_navigation(&self) -> bool {
        if self.destination == Destination::Document {
            return true;
        }
        let path = self.path().to_ascii_lowercase();
        path.ends_with(".html") || path.ends_with(".htm")
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("origin unreachable for {url}: {message}")]
    Unreachable { url: String, message: String },
    #[error("origin timed out for {url}")]
    Timeout { url: String },
    #[error("failed to read origin response for {url}: {message}")]
    Body { url: String, message: String },
}

/// Where uncached responses come from.
///
/// Non-2xx answers are `Ok`; only transport failures are errors.
#[async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse, FetchError>;
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn request(path: &str) -> FetchRequest {
        FetchRequest::get(Url::parse("https://game.test").unwrap().join(path).unwrap())
    }

    #[test]
    fn html_paths_are_navigations() {
        assert!(request("/levels/intro.html").is_navigation());
        assert!(request("/LEGACY.HTM").is_navigation());
        assert!(!request("/src/main.js").is_navigation());
        assert!(
            request("/")
                .with_destination(Destination::Document)
                .is_navigation()
        );
    }

    #[test]
    fn destination_prefers_sec_fetch_dest() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html"));
        headers.insert(SEC_FETCH_DEST, HeaderValue::from_static("script"));
        assert_eq!(Destination::from_headers(&headers), Destination::Script);

        headers.remove(SEC_FETCH_DEST);
        assert_eq!(Destination::from_headers(&headers), Destination::Document);
        assert_eq!(Destination::from_headers(&HeaderMap::new()), Destination::Empty);
    }

    #[test]
    fn validators_and_range_are_dropped_for_storage_fetches() {
        let mut original = request("/src/core/GameEngine.js");
        original
            .headers
            .insert(IF_NONE_MATCH, HeaderValue::from_static("\"v1\""));
        original.headers.insert(
            IF_MODIFIED_SINCE,
            HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"),
        );
        original
            .headers
            .insert(RANGE, HeaderValue::from_static("bytes=0-99"));
        original
            .headers
            .insert(SEC_FETCH_DEST, HeaderValue::from_static("script"));

        let clean = original.without_validators();
        assert!(!clean.headers.contains_key(IF_NONE_MATCH));
        assert!(!clean.headers.contains_key(IF_MODIFIED_SINCE));
        assert!(!clean.headers.contains_key(RANGE));
        assert_eq!(clean.headers.get(SEC_FETCH_DEST).unwrap(), "script");
        assert_eq!(clean.url, original.url);
        assert_eq!(original.headers.len(), 4);
    }

    #[test]
    fn key_drops_fragment() {
        let key = request("/index.html#intro").key();
        assert_eq!(key.url(), "https://game.test/index.html");
        assert_eq!(key.path(), "/index.html");
    }
}
