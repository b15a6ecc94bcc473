//! Capture of a response produced on a cache miss.
//!
//! Every chunk the application emits is handed to [`Recorder::on_chunk`],
//! which snapshots the policy headers and enqueues a persistence task on
//! the response's [`SerialQueue`]. [`Recorder::on_complete`] enqueues the
//! seal. Only the producer whose `request_id` owns the entry may add to or
//! seal it; any other producer poisons its own queue and stops capturing.

use crate::cache::Engine;
use crate::cache_control::{CacheControl, CacheControlError};
use crate::cookie::strip_upstream_cookies;
use crate::entry::{CacheEntry, INCOMPLETE_ENTRY_TTL, chunk_id, chunk_ttl};
use crate::exchange::{CacheRequest, ResponseSink, to_stored_headers};
use crate::queue::{QueueState, SerialQueue};
use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use http::header::{CACHE_CONTROL, HeaderMap};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

struct RequestContext {
    request_id: String,
    cache_key: String,
    request: CacheRequest,
    upstream_cookies: Vec<String>,
    chunk_ids: Mutex<Vec<String>>,
    completed: AtomicBool,
}

/// Records one response into the cache.
///
/// Cheap to clone; clones feed the same capture.
#[derive(Clone)]
pub struct Recorder {
    engine: Arc<Engine>,
    context: Arc<RequestContext>,
    queue: SerialQueue,
}

impl Recorder {
    pub(crate) fn new(
        engine: Arc<Engine>,
        request_id: String,
        cache_key: String,
        request: CacheRequest,
        upstream_cookies: Vec<String>,
    ) -> Self {
        Self {
            engine,
            context: Arc::new(RequestContext {
                request_id,
                cache_key,
                request,
                upstream_cookies,
                chunk_ids: Mutex::new(Vec::new()),
                completed: AtomicBool::new(false),
            }),
            queue: SerialQueue::new(),
        }
    }

    /// Id fencing this capture against concurrent producers of the same key.
    pub fn request_id(&self) -> &str {
        &self.context.request_id
    }

    /// Key the response is captured under.
    pub fn cache_key(&self) -> &str {
        &self.context.cache_key
    }

    /// Ids of the chunks persisted so far.
    pub fn chunk_ids(&self) -> Vec<String> {
        self.context.chunk_ids.lock().clone()
    }

    /// State of the capture queue.
    pub fn state(&self) -> QueueState {
        self.queue.state()
    }

    /// Observe one emitted chunk. `headers` are the response headers at the
    /// time of the write.
    pub fn on_chunk(&self, headers: &HeaderMap, chunk: Bytes) {
        let policy = snapshot_policy(headers);
        let recorder = self.clone();
        self.queue
            .push(async move { recorder.cache_chunk(policy, chunk).await })
            .run();
    }

    /// Observe the end of the response. Later calls are ignored.
    pub fn on_complete(&self, status: StatusCode, headers: &HeaderMap) {
        if self.context.completed.swap(true, Ordering::AcqRel) {
            return;
        }

        let headers = headers.clone();
        let recorder = self.clone();
        self.queue
            .push(async move { recorder.seal(status, headers).await })
            .run();
    }

    /// Wait for every queued persistence step to finish (or be dropped).
    pub async fn settled(&self) {
        self.queue.settled().await;
    }

    /// Wrap a sink so that writes and completion are recorded.
    pub fn wrap<S: ResponseSink>(&self, inner: S) -> RecordingSink<S> {
        RecordingSink {
            inner,
            recorder: self.clone(),
        }
    }

    fn log_lifecycle(&self, event: &'static str) {
        if self.engine.options.debug {
            debug!(
                cache_key = %self.context.cache_key,
                request_id = %self.context.request_id,
                "{}",
                event
            );
        }
    }

    async fn cache_chunk(&self, policy: Result<CacheControl, CacheControlError>, chunk: Bytes) {
        let engine = &self.engine;
        let ctx = &self.context;

        let cache_control = match policy {
            Ok(cache_control) if cache_control.should_cache() => cache_control,
            Ok(_) => return,
            Err(e) => {
                if engine.options.debug {
                    debug!(
                        cache_key = %ctx.cache_key,
                        error = %e,
                        "Not caching, unparsable Cache-Control"
                    );
                }
                return;
            }
        };

        let max_age = cache_control.effective_max_age(engine.options.default_max_age);
        if max_age.is_some_and(|age| age.is_zero()) {
            return;
        }

        let existing = match engine.responses.get(&ctx.cache_key).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(
                    cache_key = %ctx.cache_key,
                    error = %e,
                    "Entry lookup failed, abandoning capture"
                );
                self.queue.destroy();
                return;
            }
        };

        let id = chunk_id(&ctx.cache_key, &chunk);
        let ttl = chunk_ttl(max_age);

        let written = match existing {
            None => {
                let entry = CacheEntry::incomplete(ctx.request_id.clone(), max_age);
                tokio::try_join!(
                    engine.responses.set(&ctx.cache_key, entry, Some(INCOMPLETE_ENTRY_TTL)),
                    engine.chunks.set(&id, chunk, ttl)
                )
                .map(|_| "CACHED CHUNK (NEW ENTRY)")
            }
            Some(entry) if entry.request_id == ctx.request_id => {
                engine.chunks.set(&id, chunk, ttl).await.map(|_| "CACHED CHUNK")
            }
            Some(_) => {
                self.log_lifecycle("ALREADY CACHING");
                self.queue.destroy();
                return;
            }
        };

        match written {
            Ok(event) => {
                ctx.chunk_ids.lock().push(id);
                self.log_lifecycle(event);
            }
            Err(e) => {
                warn!(
                    cache_key = %ctx.cache_key,
                    error = %e,
                    "Chunk write failed, abandoning capture"
                );
                self.queue.destroy();
            }
        }
    }

    async fn seal(&self, status: StatusCode, headers: HeaderMap) {
        let engine = &self.engine;
        let ctx = &self.context;

        let chunks = ctx.chunk_ids.lock().clone();
        if chunks.is_empty() {
            return;
        }

        let entry = match engine.responses.get(&ctx.cache_key).await {
            Ok(Some(entry)) if entry.request_id == ctx.request_id => entry,
            Ok(_) => {
                self.log_lifecycle("NOT SEALED, ENTRY LOST");
                return;
            }
            Err(e) => {
                warn!(cache_key = %ctx.cache_key, error = %e, "Entry lookup failed, not sealing");
                self.queue.destroy();
                return;
            }
        };

        let mut stored = to_stored_headers(&headers);
        strip_upstream_cookies(&mut stored, &ctx.upstream_cookies);

        let max_age = entry.max_age();
        let sealed = CacheEntry {
            chunks,
            status: status.as_u16(),
            headers: stored,
            is_sealed: true,
            ..entry
        };

        if let Err(e) = engine.responses.set(&ctx.cache_key, sealed, max_age).await {
            warn!(cache_key = %ctx.cache_key, error = %e, "Seal failed");
            self.queue.destroy();
            return;
        }
        self.log_lifecycle("SEALED");

        let tag = engine
            .tag_extractor
            .as_ref()
            .and_then(|extractor| extractor.tag(&ctx.request, status, &headers));

        if let Some(tag) = tag {
            match engine.tags.set(&tag, ctx.cache_key.clone(), max_age).await {
                Ok(()) => {
                    if engine.options.debug {
                        debug!(cache_key = %ctx.cache_key, tag = %tag, "TAGGED");
                    }
                }
                Err(e) => {
                    warn!(cache_key = %ctx.cache_key, tag = %tag, error = %e, "Tag write failed")
                }
            }
        }
    }
}

fn snapshot_policy(headers: &HeaderMap) -> Result<CacheControl, CacheControlError> {
    let values: Vec<&str> = headers
        .get_all(CACHE_CONTROL)
        .iter()
        .map(|value| value.to_str())
        .collect::<Result<_, _>>()
        .map_err(|_| CacheControlError::Malformed {
            header: String::from_utf8_lossy(
                headers.get(CACHE_CONTROL).map(|v| v.as_bytes()).unwrap_or_default(),
            )
            .into_owned(),
            position: 0,
        })?;

    CacheControl::parse(&values.join(", "))
}

/// A [`ResponseSink`] that records everything written through it.
pub struct RecordingSink<S> {
    inner: S,
    recorder: Recorder,
}

impl<S> RecordingSink<S> {
    /// The recorder fed by this sink.
    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Unwrap the inner sink.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: ResponseSink> ResponseSink for RecordingSink<S> {
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
        self.recorder.on_chunk(self.inner.headers(), chunk.clone());
        self.inner.write_chunk(chunk).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.inner.finish().await?;
        self.recorder.on_complete(self.inner.status(), self.inner.headers());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    #[test]
    fn test_snapshot_policy_joins_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append(CACHE_CONTROL, HeaderValue::from_static("public"));
        headers.append(CACHE_CONTROL, HeaderValue::from_static("max-age=5"));

        let policy = snapshot_policy(&headers).unwrap();
        assert_eq!(policy.max_age(), Some(5));
    }

    #[test]
    fn test_snapshot_policy_without_header() {
        let policy = snapshot_policy(&HeaderMap::new()).unwrap();
        assert!(policy.should_cache());
    }

    #[test]
    fn test_snapshot_policy_rejects_opaque_values() {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_bytes(b"max-age=\xff").unwrap());
        assert!(snapshot_policy(&headers).is_err());
    }
}
