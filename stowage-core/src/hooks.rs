//! Caller-supplied capabilities: cache-key derivation, tag extraction and
//! hit/miss observation.

use crate::exchange::CacheRequest;
use async_trait::async_trait;
use http::StatusCode;
use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Response header written by [`XCacheHeader`].
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Response header read by the default [`EdgeCacheTag`] extractor.
pub const EDGE_CACHE_TAG: HeaderName = HeaderName::from_static("edge-cache-tag");

/// Derives the cache key of a request.
///
/// `normalized` is the default key (`<METHOD>:<normalized target>`).
/// Plain closures `Fn(&CacheRequest, &str) -> String` implement this
/// trait; implement it directly when the key needs async work.
#[async_trait]
pub trait KeyStrategy: Send + Sync {
    /// Return the key to store and look up this request under.
    async fn cache_key(&self, request: &CacheRequest, normalized: &str) -> String;
}

/// The default strategy: use the normalized key as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedKey;

#[async_trait]
impl KeyStrategy for NormalizedKey {
    async fn cache_key(&self, _request: &CacheRequest, normalized: &str) -> String {
        normalized.to_string()
    }
}

#[async_trait]
impl<F> KeyStrategy for F
where
    F: Fn(&CacheRequest, &str) -> String + Send + Sync,
{
    async fn cache_key(&self, request: &CacheRequest, normalized: &str) -> String {
        self(request, normalized)
    }
}

/// Extracts an invalidation tag from a completed response.
pub trait TagExtractor: Send + Sync {
    /// Return the tag to associate with the cached response, if any.
    fn tag(
        &self,
        request: &CacheRequest,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Option<String>;
}

impl<F> TagExtractor for F
where
    F: Fn(&CacheRequest, StatusCode, &HeaderMap) -> Option<String> + Send + Sync,
{
    fn tag(
        &self,
        request: &CacheRequest,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Option<String> {
        self(request, status, headers)
    }
}

/// Reads the tag from a response header, `Edge-Cache-Tag` by default.
#[derive(Debug, Clone)]
pub struct EdgeCacheTag {
    header: HeaderName,
}

impl Default for EdgeCacheTag {
    fn default() -> Self {
        Self {
            header: EDGE_CACHE_TAG,
        }
    }
}

impl EdgeCacheTag {
    /// Read `Edge-Cache-Tag`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a different response header.
    pub fn with_header(header: HeaderName) -> Self {
        Self { header }
    }
}

impl TagExtractor for EdgeCacheTag {
    fn tag(
        &self,
        _request: &CacheRequest,
        _status: StatusCode,
        headers: &HeaderMap,
    ) -> Option<String> {
        headers
            .get(&self.header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
    }
}

/// Notified when a request is served from cache or falls through.
///
/// Both hooks may rewrite the outgoing headers. The defaults do nothing.
pub trait CacheObserver: Send + Sync {
    /// Called before a cached response is replayed.
    fn on_hit(&self, _request: &CacheRequest, _headers: &mut HeaderMap) {}

    /// Called before the request is handed to the application.
    fn on_miss(&self, _request: &CacheRequest, _headers: &mut HeaderMap) {}
}

impl CacheObserver for () {}

/// Sets `X-Cache: HIT` or `X-Cache: MISS`.
#[derive(Debug, Clone, Copy, Default)]
pub struct XCacheHeader;

impl CacheObserver for XCacheHeader {
    fn on_hit(&self, _request: &CacheRequest, headers: &mut HeaderMap) {
        headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
    }

    fn on_miss(&self, _request: &CacheRequest, headers: &mut HeaderMap) {
        headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
    }
}
