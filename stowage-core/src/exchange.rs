//! HTTP boundary types: the request view the cache needs and the response
//! sink it writes replays into.

use crate::entry::StoredHeaders;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use std::io;
use tracing::trace;

/// The parts of an incoming request the cache looks at.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    /// Request method
    pub method: Method,
    /// Original request target (path and query)
    pub uri: String,
    /// Request headers
    pub headers: HeaderMap,
}

impl CacheRequest {
    /// Create a request view.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderMap::new(),
        }
    }

    /// A `GET` request.
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

impl<B> From<&http::Request<B>> for CacheRequest {
    fn from(req: &http::Request<B>) -> Self {
        let uri = req
            .uri()
            .path_and_query()
            .map_or_else(|| req.uri().path().to_string(), |pq| pq.as_str().to_string());

        Self {
            method: req.method().clone(),
            uri,
            headers: req.headers().clone(),
        }
    }
}

/// Where a response is written.
///
/// Hosts wrap their response object in this trait. Headers and status are
/// mutable until the first chunk is written.
#[async_trait]
pub trait ResponseSink: Send {
    /// Current status.
    fn status(&self) -> StatusCode;

    /// Set the status.
    fn set_status(&mut self, status: StatusCode);

    /// Current headers.
    fn headers(&self) -> &HeaderMap;

    /// Mutable headers.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Write one body chunk.
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()>;

    /// End the response.
    async fn finish(&mut self) -> io::Result<()>;
}

/// An in-memory [`ResponseSink`] that keeps every chunk.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    chunks: Vec<Bytes>,
    finished: bool,
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedResponse {
    /// An empty `200 OK` response.
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            chunks: Vec::new(),
            finished: false,
        }
    }

    /// Chunks in write order.
    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// The whole body.
    pub fn body(&self) -> Bytes {
        let mut body = BytesMut::new();
        for chunk in &self.chunks {
            body.extend_from_slice(chunk);
        }
        body.freeze()
    }

    /// Whether [`ResponseSink::finish`] was called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Convert into an `http::Response`.
    pub fn into_http_response(self) -> http::Response<Bytes> {
        let body = self.body();
        let mut response = http::Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[async_trait]
impl ResponseSink for BufferedResponse {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        if self.finished {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "response already finished"));
        }
        self.chunks.push(chunk);
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.finished = true;
        Ok(())
    }
}

/// Snapshot a header map for storage. Values that are not visible ASCII
/// are skipped.
pub fn to_stored_headers(headers: &HeaderMap) -> StoredHeaders {
    let mut stored = StoredHeaders::new();
    for (name, value) in headers {
        match value.to_str() {
            Ok(value) => stored
                .entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string()),
            Err(_) => trace!(header = %name, "Skipping opaque header value"),
        }
    }
    stored
}

/// Rebuild a header map from storage. Invalid names or values are skipped.
pub fn from_stored_headers(stored: &StoredHeaders) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, values) in stored {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            trace!(header = %name, "Skipping invalid stored header name");
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }
    headers
}
