//! Capture, seal and replay engine of the stowage HTTP response cache.
//!
//! The cache sits in front of an application's handlers. A `GET` whose
//! response is already stored and sealed is replayed from storage; any
//! other `GET` is handed to the application while a [`Recorder`] streams
//! each emitted chunk into storage and seals the entry once the response
//! completes.
//!
//! # Overview
//!
//! - [`key`] - canonical cache keys from request targets
//! - [`cache_control`] - `Cache-Control` parsing and the store/skip policy
//! - [`queue`] - the per-response serial task queue
//! - [`ResponseCache`] - lookup, replay, capture hand-off and tag purge
//! - [`hooks`] - key strategy, tag extraction and hit/miss observation
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use http::StatusCode;
//! use http::header::{CACHE_CONTROL, HeaderValue};
//! use stowage_core::*;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), CacheError> {
//! let cache = ResponseCache::builder()
//!     .default_max_age(Duration::from_secs(300))
//!     .tag_extractor(EdgeCacheTag::new())
//!     .build();
//!
//! let request = CacheRequest::get("/products?page=2&utm_source=mail");
//! let interception = cache.intercept(&request, &mut BufferedResponse::new()).await?;
//!
//! if let Interception::Miss(recorder) = interception {
//!     // Route the application's output through the recorder
//!     let mut response = recorder.wrap(BufferedResponse::new());
//!     response
//!         .headers_mut()
//!         .insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=60"));
//!     response.write_chunk(Bytes::from_static(b"[]")).await?;
//!     response.finish().await?;
//!     response.recorder().settled().await;
//! }
//!
//! let mut replay = BufferedResponse::new();
//! let again = CacheRequest::get("/products?page=2");
//! assert!(cache.intercept(&again, &mut replay).await?.is_hit());
//! assert_eq!(replay.status(), StatusCode::OK);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cache_control;
pub mod config;
pub mod cookie;
pub mod entry;
pub mod error;
pub mod exchange;
pub mod hooks;
pub mod key;
pub mod queue;
pub mod recorder;
mod replay;

pub use cache::{Interception, ResponseCache, ResponseCacheBuilder};
pub use cache_control::{CacheControl, CacheControlError, CacheDirective};
pub use config::CacheOptions;
pub use entry::{CacheEntry, StoredHeaders};
pub use error::{CacheError, CacheResult};
pub use exchange::{BufferedResponse, CacheRequest, ResponseSink};
pub use hooks::{
    CacheObserver, EdgeCacheTag, KeyStrategy, NormalizedKey, TagExtractor, XCacheHeader,
};
pub use key::KeyNormalizer;
pub use queue::{QueueState, SerialQueue};
pub use recorder::{Recorder, RecordingSink};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{Interception, ResponseCache};
    pub use crate::config::CacheOptions;
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::exchange::{BufferedResponse, CacheRequest, ResponseSink};
    pub use crate::hooks::{CacheObserver, EdgeCacheTag, KeyStrategy, TagExtractor, XCacheHeader};
    pub use crate::recorder::Recorder;
}
