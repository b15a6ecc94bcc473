//! Integration tests for the capture, seal, replay and purge protocol.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CACHE_CONTROL, HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use http::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use stowage_core::cache::{CHUNKS_BUCKET, RESPONSES_BUCKET, TAGS_BUCKET};
use stowage_core::hooks::X_CACHE;
use stowage_core::*;
use stowage_store::{MemoryBackend, Store, StoreBackend, StoreResult, StoreValue};

// =============================================================================
// Helpers
// =============================================================================

fn cache_on(backend: &MemoryBackend) -> ResponseCache {
    ResponseCache::builder().store(backend.clone()).build()
}

fn policy(cache_control: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(cache_control));
    headers
}

async fn miss(cache: &ResponseCache, uri: &str) -> Recorder {
    cache
        .intercept(&CacheRequest::get(uri), &mut BufferedResponse::new())
        .await
        .unwrap()
        .into_recorder()
        .expect("expected a miss")
}

async fn fetch(cache: &ResponseCache, uri: &str) -> (bool, BufferedResponse) {
    let mut response = BufferedResponse::new();
    let hit = cache
        .intercept(&CacheRequest::get(uri), &mut response)
        .await
        .unwrap()
        .is_hit();
    (hit, response)
}

async fn record(
    cache: &ResponseCache,
    uri: &str,
    headers: &HeaderMap,
    chunks: &[&'static str],
) -> Recorder {
    let recorder = miss(cache, uri).await;
    for chunk in chunks {
        recorder.on_chunk(headers, Bytes::from_static(chunk.as_bytes()));
    }
    recorder.on_complete(StatusCode::OK, headers);
    recorder.settled().await;
    recorder
}

// =============================================================================
// Capture and replay
// =============================================================================

#[tokio::test]
async fn test_hit_after_completion() {
    let cache = ResponseCache::new();
    record(&cache, "/multiple-chunks", &HeaderMap::new(), &["chunk1", "chunk2", "chunk3"]).await;

    let (hit, res) = fetch(&cache, "/multiple-chunks").await;
    assert!(hit);
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.chunks().len(), 3);
    assert_eq!(res.body(), Bytes::from_static(b"chunk1chunk2chunk3"));
    assert_eq!(res.headers()[X_CACHE], "HIT");
    assert!(res.is_finished());
}

#[tokio::test]
async fn test_no_hit_while_streaming() {
    let cache = ResponseCache::new();
    let recorder = miss(&cache, "/stream").await;

    recorder.on_chunk(&HeaderMap::new(), Bytes::from_static(b"part"));
    recorder.settled().await;
    assert_eq!(recorder.chunk_ids().len(), 1);

    let (hit, res) = fetch(&cache, "/stream").await;
    assert!(!hit);
    assert_eq!(res.headers()[X_CACHE], "MISS");

    recorder.on_complete(StatusCode::OK, &HeaderMap::new());
    recorder.settled().await;
    assert!(fetch(&cache, "/stream").await.0);
}

#[tokio::test]
async fn test_equivalent_targets_share_an_entry() {
    let cache = ResponseCache::new();
    record(&cache, "/text?a=1&b=2&utm_source=x", &HeaderMap::new(), &["hello world"]).await;

    assert!(fetch(&cache, "/text?b=2&a=1").await.0);
    assert!(fetch(&cache, "/text/?a=1&b=2#top").await.0);
    assert!(!fetch(&cache, "/text?a=1").await.0);
}

#[tokio::test]
async fn test_status_and_headers_are_replayed() {
    let cache = ResponseCache::new();
    let recorder = miss(&cache, "/forbidden").await;

    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static("custom-header"), HeaderValue::from_static("hello"));
    recorder.on_chunk(&headers, Bytes::new());
    recorder.on_complete(StatusCode::FORBIDDEN, &headers);
    recorder.settled().await;

    let (hit, res) = fetch(&cache, "/forbidden").await;
    assert!(hit);
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(res.headers()["custom-header"], "hello");
    assert!(res.body().is_empty());
}

#[tokio::test]
async fn test_response_without_chunks_is_not_sealed() {
    let backend = MemoryBackend::default();
    let cache = cache_on(&backend);
    record(&cache, "/nothing", &HeaderMap::new(), &[]).await;

    let responses = backend.bucket::<CacheEntry>(RESPONSES_BUCKET);
    assert_eq!(responses.get("GET:/nothing").await.unwrap(), None);
    assert!(!fetch(&cache, "/nothing").await.0);
}

#[tokio::test]
async fn test_non_get_requests_bypass() {
    let cache = ResponseCache::new();
    record(&cache, "/text", &HeaderMap::new(), &["hello world"]).await;

    for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
        let mut res = BufferedResponse::new();
        let outcome = cache
            .intercept(&CacheRequest::new(method, "/text"), &mut res)
            .await
            .unwrap();
        assert!(matches!(outcome, Interception::Bypass));
        assert_eq!(res.headers()[X_CACHE], "MISS");
        assert!(res.body().is_empty());
    }
}

// =============================================================================
// Policy
// =============================================================================

#[tokio::test]
async fn test_uncacheable_policies_are_not_stored() {
    let cache = ResponseCache::new();
    let cases = [
        ("/no-store", "no-store"),
        ("/private", "private"),
        ("/max-age-0", "max-age=0"),
        ("/max-age-nan", "max-age=NaN"),
        ("/invalid", "A*W&D?&*dty78=auwdtatd7*ADT?"),
    ];

    for (uri, cache_control) in cases {
        let recorder = record(&cache, uri, &policy(cache_control), &["hello world"]).await;
        assert!(recorder.chunk_ids().is_empty(), "{} was captured", uri);
        assert!(!fetch(&cache, uri).await.0, "{} was replayed", uri);
    }
}

#[tokio::test]
async fn test_no_cache_is_stored() {
    let cache = ResponseCache::new();
    record(&cache, "/no-cache", &policy("no-cache"), &["hello world"]).await;
    assert!(fetch(&cache, "/no-cache").await.0);
}

#[tokio::test(start_paused = true)]
async fn test_max_age_expires_entry() {
    let cache = ResponseCache::new();
    record(&cache, "/short", &policy("public, max-age=2"), &["hello world"]).await;

    assert!(fetch(&cache, "/short").await.0);

    tokio::time::advance(Duration::from_secs(3)).await;
    assert!(!fetch(&cache, "/short").await.0);
}

#[tokio::test(start_paused = true)]
async fn test_default_max_age_applies_without_policy() {
    let cache = ResponseCache::builder()
        .default_max_age(Duration::from_secs(5))
        .build();
    record(&cache, "/default", &HeaderMap::new(), &["hello world"]).await;

    tokio::time::advance(Duration::from_secs(4)).await;
    assert!(fetch(&cache, "/default").await.0);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!fetch(&cache, "/default").await.0);
}

#[tokio::test]
async fn test_huge_max_age_is_cached() {
    let cache = ResponseCache::new();
    let cases = [
        ("/u64-max", "max-age=18446744073709551615"),
        ("/i64-max", "public, max-age=9223372036854775807"),
        ("/beyond-u64", "s-maxage=99999999999999999999999"),
    ];

    for (uri, cache_control) in cases {
        let recorder = record(&cache, uri, &policy(cache_control), &["hello world"]).await;
        assert_eq!(recorder.state(), QueueState::Idle, "{} capture failed", uri);

        let (hit, response) = fetch(&cache, uri).await;
        assert!(hit, "{} was not replayed", uri);
        assert_eq!(response.body(), Bytes::from_static(b"hello world"));
    }
}

#[tokio::test]
async fn test_unbounded_default_max_age_is_cached() {
    let cache = ResponseCache::builder().default_max_age(Duration::MAX).build();
    record(&cache, "/forever", &HeaderMap::new(), &["hello world"]).await;
    assert!(fetch(&cache, "/forever").await.0);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_capture_expires() {
    let backend = MemoryBackend::default();
    let cache = cache_on(&backend);
    let recorder = miss(&cache, "/abandoned").await;
    recorder.on_chunk(&HeaderMap::new(), Bytes::from_static(b"part"));
    recorder.settled().await;

    let responses = backend.bucket::<CacheEntry>(RESPONSES_BUCKET);
    let entry = responses.get("GET:/abandoned").await.unwrap().unwrap();
    assert!(!entry.is_sealed);
    assert_eq!(entry.request_id, recorder.request_id());

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(responses.get("GET:/abandoned").await.unwrap(), None);

    // A new producer can take the key over
    record(&cache, "/abandoned", &HeaderMap::new(), &["fresh"]).await;
    assert_eq!(fetch(&cache, "/abandoned").await.1.body(), Bytes::from_static(b"fresh"));
}

// =============================================================================
// Fencing
// =============================================================================

#[tokio::test]
async fn test_second_producer_is_fenced_out() {
    let cache = ResponseCache::new();
    let first = miss(&cache, "/race").await;
    let second = miss(&cache, "/race").await;
    assert_ne!(first.request_id(), second.request_id());
    assert_eq!(first.cache_key(), second.cache_key());

    let headers = HeaderMap::new();
    first.on_chunk(&headers, Bytes::from_static(b"first"));
    first.settled().await;

    second.on_chunk(&headers, Bytes::from_static(b"second"));
    second.settled().await;
    assert_eq!(second.state(), QueueState::Destroyed);
    assert!(second.chunk_ids().is_empty());

    second.on_complete(StatusCode::OK, &headers);
    second.settled().await;
    assert!(!fetch(&cache, "/race").await.0);

    first.on_complete(StatusCode::OK, &headers);
    first.settled().await;

    let (hit, res) = fetch(&cache, "/race").await;
    assert!(hit);
    assert_eq!(res.body(), Bytes::from_static(b"first"));
}

#[tokio::test]
async fn test_concurrent_producers_yield_one_consistent_body() {
    let cache = ResponseCache::new();
    let mut recorders = Vec::new();
    for _ in 0..8 {
        recorders.push(miss(&cache, "/busy").await);
    }

    let tasks: Vec<_> = recorders
        .into_iter()
        .enumerate()
        .map(|(n, recorder)| {
            tokio::spawn(async move {
                let headers = HeaderMap::new();
                let body = format!("producer-{}", n);
                recorder.on_chunk(&headers, Bytes::from(body.clone()));
                recorder.on_chunk(&headers, Bytes::from(body.clone()));
                recorder.on_complete(StatusCode::OK, &headers);
                recorder.settled().await;
                (body, recorder.state())
            })
        })
        .collect();

    let mut winners = Vec::new();
    for task in tasks {
        let (body, state) = task.await.unwrap();
        if state != QueueState::Destroyed {
            winners.push(body);
        }
    }

    let (hit, res) = fetch(&cache, "/busy").await;
    assert!(hit);
    let body = String::from_utf8(res.body().to_vec()).unwrap();
    assert!(winners.iter().any(|w| body == format!("{}{}", w, w)), "torn body {}", body);
}

// =============================================================================
// Cookies
// =============================================================================

#[tokio::test]
async fn test_upstream_cookies_are_never_replayed() {
    let cache = ResponseCache::new();

    let mut upstream = BufferedResponse::new();
    upstream
        .headers_mut()
        .append(SET_COOKIE, HeaderValue::from_static("upstream=1"));
    let recorder = cache
        .intercept(&CacheRequest::get("/cookies"), &mut upstream)
        .await
        .unwrap()
        .into_recorder()
        .unwrap();

    let mut sink = recorder.wrap(upstream);
    sink.headers_mut()
        .append(SET_COOKIE, HeaderValue::from_static("handler=1"));
    sink.write_chunk(Bytes::from_static(b"hello world")).await.unwrap();
    sink.finish().await.unwrap();
    recorder.settled().await;

    let original = sink.into_inner();
    assert_eq!(original.headers().get_all(SET_COOKIE).iter().count(), 2);

    // Next visitor gets a different upstream cookie
    let mut next = BufferedResponse::new();
    next.headers_mut()
        .append(SET_COOKIE, HeaderValue::from_static("upstream=2"));
    assert!(cache
        .intercept(&CacheRequest::get("/cookies"), &mut next)
        .await
        .unwrap()
        .is_hit());

    let cookies: Vec<_> = next
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(cookies, vec!["handler=1", "upstream=2"]);
}

// =============================================================================
// Tags and purge
// =============================================================================

#[tokio::test]
async fn test_purge_unknown_tag_is_ok() {
    let cache = ResponseCache::new();
    cache.purge("unknown-tag").await.unwrap();
    cache.purge("unknown-tag").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_purge_invalidates_tagged_response() {
    let backend = MemoryBackend::default();
    let cache = ResponseCache::builder()
        .store(backend.clone())
        .tag_extractor(EdgeCacheTag::new())
        .build();

    let mut headers = policy("max-age=600");
    headers.insert(hooks::EDGE_CACHE_TAG, HeaderValue::from_static("products"));
    let recorder = record(&cache, "/products", &headers, &["[1,2,3]"]).await;
    let chunk_ids = recorder.chunk_ids();

    let tags = backend.bucket::<String>(TAGS_BUCKET);
    assert_eq!(tags.get("products").await.unwrap(), Some("GET:/products".to_string()));
    assert!(fetch(&cache, "/products").await.0);

    cache.purge("products").await.unwrap();
    assert_eq!(tags.get("products").await.unwrap(), None);
    assert!(!fetch(&cache, "/products").await.0);

    // Chunks survive the grace delay, then go
    let chunks = backend.bucket::<Bytes>(CHUNKS_BUCKET);
    assert!(chunks.has(&chunk_ids).await.unwrap());
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(!chunks.has(&chunk_ids).await.unwrap());
}

#[tokio::test]
async fn test_closure_tag_extractor_and_key_strategy() {
    let backend = MemoryBackend::default();
    let cache = ResponseCache::builder()
        .store(backend.clone())
        .key_strategy(|req: &CacheRequest, normalized: &str| {
            let tenant = req
                .headers
                .get("x-tenant")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("public");
            format!("{}:{}", tenant, normalized)
        })
        .tag_extractor(|req: &CacheRequest, status: StatusCode, _: &HeaderMap| {
            status.is_success().then(|| format!("page:{}", req.uri))
        })
        .build();

    let acme = CacheRequest::get("/page").with_header(
        HeaderName::from_static("x-tenant"),
        HeaderValue::from_static("acme"),
    );
    assert_eq!(cache.cache_key(&acme).await, "acme:GET:/page");

    let recorder = cache
        .intercept(&acme, &mut BufferedResponse::new())
        .await
        .unwrap()
        .into_recorder()
        .unwrap();
    recorder.on_chunk(&HeaderMap::new(), Bytes::from_static(b"acme page"));
    recorder.on_complete(StatusCode::OK, &HeaderMap::new());
    recorder.settled().await;

    assert!(!fetch(&cache, "/page").await.0);
    assert!(cache.intercept(&acme, &mut BufferedResponse::new()).await.unwrap().is_hit());

    let tags = backend.bucket::<String>(TAGS_BUCKET);
    assert_eq!(tags.get("page:/page").await.unwrap(), Some("acme:GET:/page".to_string()));
}

// =============================================================================
// Missing chunks
// =============================================================================

#[tokio::test]
async fn test_stale_entry_with_missing_chunk_is_evicted() {
    let backend = MemoryBackend::default();
    let cache = cache_on(&backend);
    let recorder = record(&cache, "/evicted", &HeaderMap::new(), &["a", "b"]).await;

    let chunks = backend.bucket::<Bytes>(CHUNKS_BUCKET);
    chunks.del(&recorder.chunk_ids()[..1]).await.unwrap();

    let (hit, res) = fetch(&cache, "/evicted").await;
    assert!(!hit);
    assert_eq!(res.headers()[X_CACHE], "MISS");

    let responses = backend.bucket::<CacheEntry>(RESPONSES_BUCKET);
    assert_eq!(responses.get("GET:/evicted").await.unwrap(), None);
}

/// A backend whose chunk bucket claims every key exists.
#[derive(Clone, Default)]
struct OptimisticBackend {
    inner: MemoryBackend,
}

struct OptimisticStore<T: StoreValue> {
    inner: Arc<dyn Store<T>>,
}

#[async_trait]
impl<T: StoreValue> Store<T> for OptimisticStore<T> {
    async fn has(&self, _keys: &[String]) -> StoreResult<bool> {
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<T>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: T, ttl: Option<Duration>) -> StoreResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn del(&self, keys: &[String]) -> StoreResult<()> {
        self.inner.del(keys).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        self.inner.expire(key, ttl).await
    }
}

impl StoreBackend for OptimisticBackend {
    fn bucket<T: StoreValue>(&self, name: &str) -> Arc<dyn Store<T>> {
        if name == CHUNKS_BUCKET {
            Arc::new(OptimisticStore {
                inner: self.inner.bucket(name),
            })
        } else {
            self.inner.bucket(name)
        }
    }
}

#[tokio::test]
async fn test_chunk_lost_during_replay_fails_request() {
    let backend = OptimisticBackend::default();
    let cache = ResponseCache::builder().store(backend.clone()).build();
    let recorder = record(&cache, "/lost", &HeaderMap::new(), &["a", "b"]).await;

    let lost = recorder.chunk_ids()[1].clone();
    backend
        .inner
        .bucket::<Bytes>(CHUNKS_BUCKET)
        .del(std::slice::from_ref(&lost))
        .await
        .unwrap();

    let mut res = BufferedResponse::new();
    let err = cache
        .intercept(&CacheRequest::get("/lost"), &mut res)
        .await
        .err()
        .expect("replay should fail");

    match err {
        CacheError::MissingChunk { chunk_id } => assert_eq!(chunk_id, lost),
        other => panic!("unexpected error {}", other),
    }
    assert!(res.chunks().is_empty());
    assert!(!res.is_finished());
}

// =============================================================================
// Configuration
// =============================================================================

#[tokio::test]
async fn test_custom_observer_replaces_x_cache() {
    struct Counting(Arc<parking_lot::Mutex<(u32, u32)>>);

    impl CacheObserver for Counting {
        fn on_hit(&self, _: &CacheRequest, headers: &mut HeaderMap) {
            self.0.lock().0 += 1;
            headers.insert("x-served-by", HeaderValue::from_static("cache"));
        }

        fn on_miss(&self, _: &CacheRequest, _: &mut HeaderMap) {
            self.0.lock().1 += 1;
        }
    }

    let counts = Arc::new(parking_lot::Mutex::new((0, 0)));
    let cache = ResponseCache::builder()
        .observer(Counting(counts.clone()))
        .debug(true)
        .build();
    assert!(cache.options().debug);

    record(&cache, "/observed", &HeaderMap::new(), &["x"]).await;
    let (hit, res) = fetch(&cache, "/observed").await;

    assert!(hit);
    assert_eq!(res.headers()["x-served-by"], "cache");
    assert!(res.headers().get(X_CACHE).is_none());
    assert_eq!(*counts.lock(), (1, 1));
}
