//! Cache key definitions.
//!
//! Entries are keyed by request identity only: method plus normalized URL.

use std::fmt;

use axum::http::Method;
use url::{Position, Url};

/// Identifies a cached response by `(method, normalized URL)`.
///
/// Normalization drops the fragment, which never reaches the origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    url: String,
    path_start: usize,
    path_end: usize,
}

impl CacheKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut normalized = url.clone();
        normalized.set_fragment(None);
        let path_start = normalized[..Position::BeforePath].len();
        let path_end = normalized[..Position::AfterPath].len();

        Self {
            method: method.clone(),
            url: normalized.into(),
            path_start,
            path_end,
        }
    }

    /// Key for a `GET` of the given URL.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The URL path, used for pattern matching.
    pub fn path(&self) -> &str {
        &self.url[self.path_start..self.path_end]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}
