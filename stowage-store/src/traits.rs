//! Store trait definitions.

use crate::error::StoreResult;
use crate::value::StoreValue;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A typed key-value bucket with per-key expiry.
///
/// Every operation may suspend. Implementations must be safe to share
/// between tasks.
#[async_trait]
pub trait Store<T: StoreValue>: Send + Sync {
    /// Check that every key exists.
    ///
    /// Returns `Ok(true)` for an empty key list.
    async fn has(&self, keys: &[String]) -> StoreResult<bool>;

    /// Get a value.
    ///
    /// Returns `Ok(Some(value))` if the key exists, `Ok(None)` if not found
    /// or expired, or an error if the operation fails.
    async fn get(&self, key: &str) -> StoreResult<Option<T>>;

    /// Set a value.
    ///
    /// # Arguments
    ///
    /// * `key` - The key
    /// * `value` - The value
    /// * `ttl` - Time-to-live; `None` keeps the value until evicted or
    ///   deleted, a zero duration deletes the key
    async fn set(&self, key: &str, value: T, ttl: Option<Duration>) -> StoreResult<()>;

    /// Delete keys. Missing keys are ignored.
    async fn del(&self, keys: &[String]) -> StoreResult<()>;

    /// Set or update the expiration time for a key.
    ///
    /// A zero duration deletes the key. Missing keys are ignored.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;
}

/// A storage backend that hands out named, typed buckets.
///
/// Opening the same bucket name with the same value type twice must
/// address the same underlying data.
pub trait StoreBackend: Send + Sync {
    /// Open the bucket `name` holding values of type `T`.
    fn bucket<T: StoreValue>(&self, name: &str) -> Arc<dyn Store<T>>;
}

impl<B: StoreBackend> StoreBackend for Arc<B> {
    fn bucket<T: StoreValue>(&self, name: &str) -> Arc<dyn Store<T>> {
        (**self).bucket(name)
    }
}
