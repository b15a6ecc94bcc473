//! Storage for the stowage response cache.
//!
//! A backend hands out named, typed buckets; every bucket implements the
//! same small [`Store`] contract (`has`/`get`/`set`/`del`/`expire`).
//!
//! # Features
//!
//! - `redis` - Enable the Redis backend (enabled by default)
//!
//! # Examples
//!
//! ## In-memory
//!
//! ```
//! use stowage_store::*;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), StoreError> {
//! let backend = MemoryBackend::new(MemoryStoreConfig::new().with_max_entries(1000));
//! let tags = backend.bucket::<String>("tags");
//!
//! tags.set("users", "GET:/users".to_string(), Some(Duration::from_secs(60))).await?;
//! assert_eq!(tags.get("users").await?, Some("GET:/users".to_string()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Redis
//!
//! ```no_run
//! use stowage_store::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), StoreError> {
//!     let config = RedisStoreConfig::from_env().with_key_prefix("myapp");
//!     let backend = RedisBackend::connect(config).await?;
//!     let chunks = backend.bucket::<bytes::Bytes>("chunks");
//!     let _ = chunks.get("GET:/text:deadbeef").await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod memory;
pub mod traits;
pub mod value;

#[cfg(feature = "redis")]
pub mod lock;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use config::{DEFAULT_KEY_PREFIX, DEFAULT_LOCK_TTL, MemoryStoreConfig, RedisStoreConfig};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryBackend, MemoryStore};
pub use traits::{Store, StoreBackend};
pub use value::{StoreValue, TAG_WIDTH, ValueKind};

#[cfg(feature = "redis")]
pub use lock::{LockError, LockGuard, RedisLock};
#[cfg(feature = "redis")]
pub use redis_store::{RedisBackend, RedisStore};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{MemoryStoreConfig, RedisStoreConfig};
    pub use crate::error::{StoreError, StoreResult};
    pub use crate::memory::{MemoryBackend, MemoryStore};
    pub use crate::traits::{Store, StoreBackend};
    pub use crate::value::{StoreValue, ValueKind};

    #[cfg(feature = "redis")]
    pub use crate::redis_store::{RedisBackend, RedisStore};
}
