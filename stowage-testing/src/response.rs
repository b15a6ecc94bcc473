//! A recording response sink with inspection helpers.

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use http::header::{HeaderMap, SET_COOKIE};
use std::io;
use stowage_core::hooks::X_CACHE;
use stowage_core::{BufferedResponse, ResponseSink};

/// A response captured by [`TestServer`](crate::TestServer), or written
/// directly by a test.
#[derive(Debug, Clone, Default)]
pub struct TestResponse {
    inner: BufferedResponse,
}

impl TestResponse {
    /// An empty `200 OK` response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Response status.
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// First value of a header, if it is valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    /// Every value of a header.
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.inner
            .headers()
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect()
    }

    /// The `x-cache` header.
    pub fn x_cache(&self) -> Option<&str> {
        self.inner
            .headers()
            .get(X_CACHE)
            .and_then(|value| value.to_str().ok())
    }

    /// `Set-Cookie` values in order.
    pub fn set_cookies(&self) -> Vec<&str> {
        self.header_all(SET_COOKIE.as_str())
    }

    /// Chunks in write order.
    pub fn chunks(&self) -> &[Bytes] {
        self.inner.chunks()
    }

    /// The whole body.
    pub fn body(&self) -> Bytes {
        self.inner.body()
    }

    /// The body as text. Invalid UTF-8 is replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.inner.body()).into_owned()
    }

    /// Deserialize the body as JSON.
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.inner.body())
    }

    /// Whether the response was finished.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

#[async_trait]
impl ResponseSink for TestResponse {
    fn status(&self) -> StatusCode {
        self.inner.status()
    }

    fn set_status(&mut self, status: StatusCode) {
        self.inner.set_status(status);
    }

    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.inner.write_chunk(chunk).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.inner.finish().await
    }
}
