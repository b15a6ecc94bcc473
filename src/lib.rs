//! Stowage - an aggressive HTTP response cache.
//!
//! Stowage sits in front of an application's request handlers. Responses
//! to `GET` requests are captured chunk by chunk while they stream out,
//! sealed once complete, and replayed for later requests with the same
//! normalized key. `Cache-Control` decides what is stored and for how
//! long; cookies set for one client are never replayed to another; tagged
//! responses can be purged out of band.
//!
//! This crate re-exports the engine from `stowage-core`, the storage
//! backends as [`store`], and (with the `testing` feature) the test
//! harness as `testing`.
//!
//! # Features
//!
//! - `redis` - Redis storage backend (default)
//! - `testing` - Test harness and fault injection
//! - `full` - Everything
//!
//! # Example
//!
//! ```
//! use stowage::prelude::*;
//! use stowage::bytes::Bytes;
//! use stowage::http::header::{CACHE_CONTROL, HeaderValue};
//! use stowage::store::{MemoryBackend, MemoryStoreConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), CacheError> {
//! let cache = ResponseCache::builder()
//!     .store(MemoryBackend::new(MemoryStoreConfig::new().with_max_entries(10_000)))
//!     .options(CacheOptions::from_env())
//!     .build();
//!
//! let request = CacheRequest::get("/hello");
//! let mut response = BufferedResponse::new();
//!
//! match cache.intercept(&request, &mut response).await? {
//!     Interception::Hit => {}
//!     Interception::Bypass => {
//!         // run the handler straight into `response`
//!     }
//!     Interception::Miss(recorder) => {
//!         let mut sink = recorder.wrap(response);
//!         sink.headers_mut()
//!             .insert(CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
//!         sink.write_chunk(Bytes::from_static(b"hello world")).await?;
//!         sink.finish().await?;
//!         response = sink.into_inner();
//!     }
//! }
//!
//! assert_eq!(response.body(), Bytes::from_static(b"hello world"));
//! # Ok(())
//! # }
//! ```

// Re-export core functionality
pub use stowage_core::*;

pub use async_trait::async_trait;
pub use bytes;
pub use http;

/// Storage backends and the store contract.
pub use stowage_store as store;

#[cfg(feature = "testing")]
pub use stowage_testing as testing;

// Prelude for common imports
pub mod prelude {
    pub use stowage_core::prelude::*;
    pub use stowage_core::{CacheControl, KeyNormalizer, RecordingSink};
    pub use stowage_store::{MemoryBackend, Store, StoreBackend};

    #[cfg(feature = "redis")]
    pub use stowage_store::{RedisBackend, RedisStoreConfig};
}
