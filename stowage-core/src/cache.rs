//! The response cache: lookup, capture hand-off and tag purge.

use crate::config::CacheOptions;
use crate::cookie::set_cookies;
use crate::entry::{CHUNK_PURGE_DELAY, CacheEntry};
use crate::error::CacheResult;
use crate::exchange::{CacheRequest, ResponseSink};
use crate::hooks::{CacheObserver, KeyStrategy, NormalizedKey, TagExtractor, XCacheHeader};
use crate::key::KeyNormalizer;
use crate::recorder::Recorder;
use crate::replay::replay;
use bytes::Bytes;
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use stowage_store::{MemoryBackend, Store, StoreBackend};
use tracing::{debug, warn};
use uuid::Uuid;

/// Bucket holding [`CacheEntry`] values.
pub const RESPONSES_BUCKET: &str = "responses";

/// Bucket holding body chunks.
pub const CHUNKS_BUCKET: &str = "chunks";

/// Bucket holding tag to cache-key mappings.
pub const TAGS_BUCKET: &str = "tags";

/// What [`ResponseCache::intercept`] did with a request.
#[must_use]
pub enum Interception {
    /// Not a cacheable method; the request is reported as a miss and goes to
    /// the application without capture
    Bypass,
    /// The cached response was written to the sink; the request is done
    Hit,
    /// Nothing usable is cached; run the application and feed its output to
    /// the recorder
    Miss(Recorder),
}

impl Interception {
    /// Whether the response was served from cache.
    pub fn is_hit(&self) -> bool {
        matches!(self, Interception::Hit)
    }

    /// The recorder of a miss.
    pub fn into_recorder(self) -> Option<Recorder> {
        match self {
            Interception::Miss(recorder) => Some(recorder),
            _ => None,
        }
    }
}

pub(crate) struct Engine {
    pub(crate) responses: Arc<dyn Store<CacheEntry>>,
    pub(crate) chunks: Arc<dyn Store<Bytes>>,
    pub(crate) tags: Arc<dyn Store<String>>,
    pub(crate) normalizer: KeyNormalizer,
    pub(crate) key_strategy: Box<dyn KeyStrategy>,
    pub(crate) tag_extractor: Option<Box<dyn TagExtractor>>,
    pub(crate) observer: Box<dyn CacheObserver>,
    pub(crate) options: CacheOptions,
}

/// An HTTP response cache.
///
/// Cheap to clone; clones share stores and hooks.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use http::{HeaderMap, StatusCode};
/// use stowage_core::{BufferedResponse, CacheRequest, Interception, ResponseCache};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), stowage_core::CacheError> {
/// let cache = ResponseCache::builder().build();
/// let request = CacheRequest::get("/hello");
///
/// let mut response = BufferedResponse::new();
/// if let Interception::Miss(recorder) = cache.intercept(&request, &mut response).await? {
///     let headers = HeaderMap::new();
///     recorder.on_chunk(&headers, Bytes::from_static(b"hello world"));
///     recorder.on_complete(StatusCode::OK, &headers);
///     recorder.settled().await;
/// }
///
/// let mut replayed = BufferedResponse::new();
/// assert!(cache.intercept(&request, &mut replayed).await?.is_hit());
/// assert_eq!(replayed.body(), Bytes::from_static(b"hello world"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ResponseCache {
    engine: Arc<Engine>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ResponseCache {
    /// A cache on a fresh in-memory backend with default hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start configuring a cache.
    pub fn builder() -> ResponseCacheBuilder {
        ResponseCacheBuilder::default()
    }

    /// Options in effect.
    pub fn options(&self) -> &CacheOptions {
        &self.engine.options
    }

    /// The key a request is stored under.
    pub async fn cache_key(&self, request: &CacheRequest) -> String {
        let normalized = self.engine.normalizer.normalize(&request.method, &request.uri);
        self.engine.key_strategy.cache_key(request, &normalized).await
    }

    /// Look a request up and either replay it into `sink` or hand back a
    /// [`Recorder`] for the application's response.
    ///
    /// Storage failures during lookup degrade to a miss. A replay that finds
    /// a chunk missing fails before anything is written.
    pub async fn intercept<S>(
        &self,
        request: &CacheRequest,
        sink: &mut S,
    ) -> CacheResult<Interception>
    where
        S: ResponseSink + ?Sized,
    {
        let engine = &self.engine;

        if request.method != Method::GET {
            engine.observer.on_miss(request, sink.headers_mut());
            return Ok(Interception::Bypass);
        }

        let cache_key = self.cache_key(request).await;

        match engine.responses.get(&cache_key).await {
            Ok(Some(entry)) if entry.is_sealed => match engine.chunks.has(&entry.chunks).await {
                Ok(true) => {
                    replay(engine, request, &entry, sink).await?;
                    if engine.options.debug {
                        debug!(cache_key = %cache_key, "HIT");
                    }
                    return Ok(Interception::Hit);
                }
                Ok(false) => {
                    warn!(cache_key = %cache_key, "Sealed entry is missing chunks, evicting");
                    if let Err(e) = engine.responses.del(std::slice::from_ref(&cache_key)).await {
                        warn!(cache_key = %cache_key, error = %e, "Failed to evict stale entry");
                    }
                }
                Err(e) => {
                    warn!(
                        cache_key = %cache_key,
                        error = %e,
                        "Chunk lookup failed, treating as miss"
                    );
                }
            },
            Ok(_) => {}
            Err(e) => {
                warn!(cache_key = %cache_key, error = %e, "Cache lookup failed, treating as miss");
            }
        }

        engine.observer.on_miss(request, sink.headers_mut());
        if engine.options.debug {
            debug!(cache_key = %cache_key, "MISS");
        }

        let upstream_cookies = set_cookies(sink.headers());
        Ok(Interception::Miss(Recorder::new(
            self.engine.clone(),
            Uuid::new_v4().to_string(),
            cache_key,
            request.clone(),
            upstream_cookies,
        )))
    }

    /// Invalidate the response last tagged with `tag`.
    ///
    /// The entry and the tag mapping go immediately; the chunks are deleted
    /// after a grace delay so replays already in flight can finish. An
    /// unknown tag is not an error.
    pub async fn purge(&self, tag: &str) -> CacheResult<()> {
        let engine = &self.engine;

        let Some(cache_key) = engine.tags.get(tag).await? else {
            if engine.options.debug {
                debug!(tag = %tag, "Nothing to purge");
            }
            return Ok(());
        };

        let entry = engine.responses.get(&cache_key).await?;
        engine.tags.del(&[tag.to_string()]).await?;
        engine.responses.del(std::slice::from_ref(&cache_key)).await?;

        if engine.options.debug {
            debug!(tag = %tag, cache_key = %cache_key, "PURGED");
        }

        if let Some(entry) = entry
            && !entry.chunks.is_empty()
        {
            let chunks = engine.chunks.clone();
            tokio::spawn(async move {
                tokio::time::sleep(CHUNK_PURGE_DELAY).await;
                if let Err(e) = chunks.del(&entry.chunks).await {
                    warn!(error = %e, "Failed to delete purged chunks");
                }
            });
        }

        Ok(())
    }
}

struct Buckets {
    responses: Arc<dyn Store<CacheEntry>>,
    chunks: Arc<dyn Store<Bytes>>,
    tags: Arc<dyn Store<String>>,
}

impl Buckets {
    fn open<B: StoreBackend>(backend: &B) -> Self {
        Self {
            responses: backend.bucket(RESPONSES_BUCKET),
            chunks: backend.bucket(CHUNKS_BUCKET),
            tags: backend.bucket(TAGS_BUCKET),
        }
    }
}

/// Builder for [`ResponseCache`].
#[derive(Default)]
pub struct ResponseCacheBuilder {
    options: CacheOptions,
    buckets: Option<Buckets>,
    normalizer: Option<KeyNormalizer>,
    key_strategy: Option<Box<dyn KeyStrategy>>,
    tag_extractor: Option<Box<dyn TagExtractor>>,
    observer: Option<Box<dyn CacheObserver>>,
}

impl ResponseCacheBuilder {
    /// Replace all options.
    pub fn options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    /// Lifetime for responses without `max-age`/`s-maxage`.
    pub fn default_max_age(mut self, max_age: Duration) -> Self {
        self.options.default_max_age = Some(max_age);
        self
    }

    /// Toggle lifecycle events.
    pub fn debug(mut self, debug: bool) -> Self {
        self.options.debug = debug;
        self
    }

    /// Storage backend. Defaults to a fresh [`MemoryBackend`].
    pub fn store<B: StoreBackend>(mut self, backend: B) -> Self {
        self.buckets = Some(Buckets::open(&backend));
        self
    }

    /// Key normalizer. Defaults to [`KeyNormalizer::default`].
    pub fn normalizer(mut self, normalizer: KeyNormalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Key strategy. Defaults to [`NormalizedKey`].
    pub fn key_strategy(mut self, strategy: impl KeyStrategy + 'static) -> Self {
        self.key_strategy = Some(Box::new(strategy));
        self
    }

    /// Tag extractor. No tags are recorded without one.
    pub fn tag_extractor(mut self, extractor: impl TagExtractor + 'static) -> Self {
        self.tag_extractor = Some(Box::new(extractor));
        self
    }

    /// Hit/miss observer. Defaults to [`XCacheHeader`].
    pub fn observer(mut self, observer: impl CacheObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Build the cache.
    pub fn build(self) -> ResponseCache {
        let Buckets {
            responses,
            chunks,
            tags,
        } = self
            .buckets
            .unwrap_or_else(|| Buckets::open(&MemoryBackend::default()));

        ResponseCache {
            engine: Arc::new(Engine {
                responses,
                chunks,
                tags,
                normalizer: self.normalizer.unwrap_or_default(),
                key_strategy: self.key_strategy.unwrap_or_else(|| Box::new(NormalizedKey)),
                tag_extractor: self.tag_extractor,
                observer: self.observer.unwrap_or_else(|| Box::new(XCacheHeader)),
                options: self.options,
            }),
        }
    }
}
