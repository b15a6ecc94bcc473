//! Testing utilities for applications using the stowage response cache.
//!
//! ## Features
//!
//! - **TestServer** - Scripted routes behind a [`ResponseCache`](stowage_core::ResponseCache)
//! - **TestResponse** - Recording response sink
//! - **FailingBackend** - Storage fault injection
//! - **Assertions** - HIT/MISS, status, body and header checks
//!
//! ## Quick Start
//!
//! ```
//! use http::StatusCode;
//! use stowage_core::ResponseCache;
//! use stowage_testing::*;
//!
//! # tokio_test::block_on(async {
//! let server = TestServer::new(ResponseCache::new())
//!     .route("/forbidden", Route::text("").with_status(StatusCode::FORBIDDEN));
//!
//! server.get("/forbidden").await;
//! server.settle().await;
//!
//! let res = server.get("/forbidden").await;
//! assert_status(&res, StatusCode::FORBIDDEN);
//! assert_cache_hit(&res);
//! # });
//! ```
//!
//! ## Fault Injection
//!
//! ```
//! use stowage_core::ResponseCache;
//! use stowage_core::cache::RESPONSES_BUCKET;
//! use stowage_testing::*;
//!
//! # tokio_test::block_on(async {
//! let backend = FailingBackend::memory();
//! let server = TestServer::new(ResponseCache::builder().store(backend.clone()).build());
//!
//! backend.fail(RESPONSES_BUCKET, Operation::Get);
//! let res = server.get("/text").await;
//! assert_cache_miss(&res);
//! assert_body(&res, "hello world");
//! # });
//! ```

pub mod assertions;
pub mod failing;
pub mod response;
pub mod server;

pub use assertions::*;
pub use failing::{FailingBackend, FailingStore, Operation};
pub use response::TestResponse;
pub use server::{Route, TestServer};
