//! A scripted application fronted by a [`ResponseCache`].

use crate::response::TestResponse;
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderName, HeaderValue, SET_COOKIE};
use http::{Method, StatusCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use stowage_core::{CacheRequest, CacheResult, Interception, Recorder, ResponseCache, ResponseSink};

static COOKIE_SEQ: AtomicU64 = AtomicU64::new(1);

/// A fresh `Set-Cookie` value; every call yields a different cookie value.
fn fresh_cookie(name: &str) -> Option<HeaderValue> {
    let seq = COOKIE_SEQ.fetch_add(1, Ordering::Relaxed);
    HeaderValue::from_str(&format!("{}={}; Path=/", name, seq)).ok()
}

/// What the application answers on one path.
///
/// Cookies are minted per response, so two responses never carry the same
/// cookie value.
#[derive(Debug, Clone)]
pub struct Route {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    cookies: Vec<String>,
    chunks: Vec<Bytes>,
    chunk_delay: Option<Duration>,
}

impl Default for Route {
    fn default() -> Self {
        Self::new()
    }
}

impl Route {
    /// `200 OK` with no body chunks at all.
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: Vec::new(),
            cookies: Vec::new(),
            chunks: Vec::new(),
            chunk_delay: None,
        }
    }

    /// A single-chunk body. An empty string still writes one empty chunk.
    pub fn text(body: impl Into<Bytes>) -> Self {
        Self::chunks([body])
    }

    /// A JSON body.
    pub fn json<T: serde::Serialize>(value: &T) -> serde_json::Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::text(body).with_header(CONTENT_TYPE, HeaderValue::from_static("application/json")))
    }

    /// A body written as separate chunks.
    pub fn chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            ..Self::new()
        }
    }

    /// Set the status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Add a response header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }

    /// Set `Cache-Control`.
    pub fn with_cache_control(self, value: &'static str) -> Self {
        self.with_header(CACHE_CONTROL, HeaderValue::from_static(value))
    }

    /// Set a fresh cookie named `name` on every response.
    pub fn with_cookie(mut self, name: impl Into<String>) -> Self {
        self.cookies.push(name.into());
        self
    }

    /// Sleep before each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Write this route's response into `sink` and finish it.
    pub async fn serve<S>(&self, sink: &mut S) -> io::Result<()>
    where
        S: ResponseSink + ?Sized,
    {
        sink.set_status(self.status);
        for (name, value) in &self.headers {
            sink.headers_mut().insert(name.clone(), value.clone());
        }
        for name in &self.cookies {
            if let Some(cookie) = fresh_cookie(name) {
                sink.headers_mut().append(SET_COOKIE, cookie);
            }
        }

        for chunk in &self.chunks {
            if let Some(delay) = self.chunk_delay {
                tokio::time::sleep(delay).await;
            }
            sink.write_chunk(chunk.clone()).await?;
        }

        sink.finish().await
    }
}

/// An application with scripted routes behind a [`ResponseCache`].
///
/// Routes match on the path (the query is ignored) for every method.
/// Unrouted paths answer `hello world`.
///
/// # Examples
///
/// ```
/// use stowage_core::ResponseCache;
/// use stowage_testing::*;
///
/// # tokio_test::block_on(async {
/// let server = TestServer::new(ResponseCache::new())
///     .route("/text", Route::text("hello world"));
///
/// assert_cache_miss(&server.get("/text").await);
/// server.settle().await;
///
/// let res = server.get("/text").await;
/// assert_cache_hit(&res);
/// assert_body(&res, "hello world");
/// # });
/// ```
pub struct TestServer {
    cache: ResponseCache,
    routes: HashMap<String, Route>,
    upstream_cookies: HashMap<String, Vec<String>>,
    fallback: Route,
    recorders: Mutex<Vec<Recorder>>,
}

impl TestServer {
    /// Front an empty application with `cache`.
    pub fn new(cache: ResponseCache) -> Self {
        Self {
            cache,
            routes: HashMap::new(),
            upstream_cookies: HashMap::new(),
            fallback: Route::text("hello world"),
            recorders: Mutex::new(Vec::new()),
        }
    }

    /// Answer `path` with `route`.
    pub fn route(mut self, path: impl Into<String>, route: Route) -> Self {
        self.routes.insert(path.into(), route);
        self
    }

    /// Have a middleware in front of the cache set a fresh cookie `name` on
    /// every response to `path`.
    pub fn upstream_cookie(mut self, path: impl Into<String>, name: impl Into<String>) -> Self {
        self.upstream_cookies
            .entry(path.into())
            .or_default()
            .push(name.into());
        self
    }

    /// The cache in front of the application.
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// `GET` a target. Panics if the cache fails the request.
    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(CacheRequest::get(uri)).await
    }

    /// Send a request with any method and no body. Panics if the cache
    /// fails the request.
    pub async fn call(&self, method: Method, uri: &str) -> TestResponse {
        self.send(CacheRequest::new(method, uri)).await
    }

    /// Send a request. Panics if the cache fails the request.
    pub async fn send(&self, request: CacheRequest) -> TestResponse {
        match self.request(request).await {
            Ok(response) => response,
            Err(e) => panic!("Cache failed the request: {}", e),
        }
    }

    /// Send a request and surface cache failures.
    pub async fn request(&self, request: CacheRequest) -> CacheResult<TestResponse> {
        let path = request.uri.split(['?', '#']).next().unwrap_or_default();
        let route = self.routes.get(path).unwrap_or(&self.fallback);

        let mut response = TestResponse::new();
        for name in self.upstream_cookies.get(path).into_iter().flatten() {
            if let Some(cookie) = fresh_cookie(name) {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
        }

        match self.cache.intercept(&request, &mut response).await? {
            Interception::Hit => {}
            Interception::Bypass => route.serve(&mut response).await?,
            Interception::Miss(recorder) => {
                self.recorders.lock().push(recorder.clone());
                let mut sink = recorder.wrap(response);
                route.serve(&mut sink).await?;
                response = sink.into_inner();
            }
        }

        Ok(response)
    }

    /// Wait until every capture started so far has been persisted or
    /// abandoned.
    pub async fn settle(&self) {
        let recorders = std::mem::take(&mut *self.recorders.lock());
        for recorder in recorders {
            recorder.settled().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_route_serves_chunks() {
        let route = Route::chunks(["chunk1", "chunk2"])
            .with_status(StatusCode::CREATED)
            .with_cache_control("public, max-age=60")
            .with_cookie("session");

        let mut res = TestResponse::new();
        route.serve(&mut res).await.unwrap();

        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.chunks().len(), 2);
        assert_eq!(res.text(), "chunk1chunk2");
        assert_eq!(res.header("cache-control"), Some("public, max-age=60"));
        assert!(res.set_cookies()[0].starts_with("session="));
        assert!(res.is_finished());
    }

    #[tokio::test]
    async fn test_cookies_are_fresh_per_response() {
        let route = Route::text("").with_cookie("session");

        let mut first = TestResponse::new();
        let mut second = TestResponse::new();
        route.serve(&mut first).await.unwrap();
        route.serve(&mut second).await.unwrap();

        assert_ne!(first.set_cookies(), second.set_cookies());
        assert_eq!(first.chunks().len(), 1);
    }

    #[tokio::test]
    async fn test_json_route() {
        let route = Route::json(&serde_json::json!({ "hello": "world" })).unwrap();
        let mut res = TestResponse::new();
        route.serve(&mut res).await.unwrap();

        assert_eq!(res.header("content-type"), Some("application/json"));
        let body: serde_json::Value = res.body_json().unwrap();
        assert_eq!(body["hello"], "world");
    }

    #[tokio::test]
    async fn test_fallback_and_upstream_cookie() {
        let server = TestServer::new(ResponseCache::new()).upstream_cookie("/upstream", "up");

        let res = server.call(Method::POST, "/upstream?x=1").await;
        assert_eq!(res.text(), "hello world");
        assert_eq!(res.set_cookies().len(), 1);
        assert!(res.set_cookies()[0].starts_with("up="));
    }
}
