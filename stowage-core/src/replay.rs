//! Replay of a sealed entry.

use crate::cache::Engine;
use crate::cookie::{merge_cookies, set_cookies, set_set_cookies};
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::exchange::{CacheRequest, ResponseSink, from_stored_headers};
use futures::future::try_join_all;
use http::StatusCode;

/// Write `entry` into `sink`: status, headers (stored ones replace same-named
/// headers already on the sink), merged cookies, observer hook, then every
/// chunk in order.
///
/// All chunks are loaded before anything is written, so a missing chunk
/// fails the request without emitting a truncated body.
pub(crate) async fn replay<S>(
    engine: &Engine,
    request: &CacheRequest,
    entry: &CacheEntry,
    sink: &mut S,
) -> CacheResult<()>
where
    S: ResponseSink + ?Sized,
{
    let body = try_join_all(entry.chunks.iter().map(|chunk_id| async move {
        engine
            .chunks
            .get(chunk_id)
            .await
            .map_err(CacheError::from)
            .and_then(|chunk| {
                chunk.ok_or_else(|| CacheError::MissingChunk {
                    chunk_id: chunk_id.clone(),
                })
            })
    }))
    .await?;

    let stored = from_stored_headers(&entry.headers);
    let fresh_cookies = set_cookies(sink.headers());
    let cached_cookies = set_cookies(&stored);

    sink.set_status(StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK));

    let headers = sink.headers_mut();
    for name in stored.keys() {
        headers.remove(name);
    }
    for (name, value) in &stored {
        headers.append(name.clone(), value.clone());
    }
    set_set_cookies(headers, &merge_cookies(&cached_cookies, &fresh_cookies));

    engine.observer.on_hit(request, sink.headers_mut());

    for chunk in body {
        sink.write_chunk(chunk).await?;
    }
    sink.finish().await?;

    Ok(())
}
