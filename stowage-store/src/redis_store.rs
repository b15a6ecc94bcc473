//! Redis store implementation.

use crate::config::RedisStoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::lock::{LockError, RedisLock};
use crate::traits::{Store, StoreBackend};
use crate::value::{StoreValue, decode, encode};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A [`StoreBackend`] backed by one Redis connection manager.
///
/// Bucket `name` lives under `<prefix>:<name>:`; its write locks under
/// `<prefix>:<name>:locks:`.
///
/// The bucket segment keeps the responses, chunks and tags of one cache key
/// apart. Data written under the flat `<prefix>:<key>` / `<prefix>:locks:<key>`
/// layout is therefore not visible to this backend, and the two layouts
/// cannot share a Redis database as one cache.
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
    config: Arc<RedisStoreConfig>,
}

impl RedisBackend {
    /// Connect to Redis.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use stowage_store::*;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), StoreError> {
    ///     let config = RedisStoreConfig::redis("redis://localhost:6379");
    ///     let backend = RedisBackend::connect(config).await?;
    ///     let tags = backend.bucket::<String>("tags");
    ///     tags.set("users", "GET:/users".to_string(), None).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(config: RedisStoreConfig) -> StoreResult<Self> {
        let client =
            Client::open(config.url.as_str()).map_err(|e| StoreError::Config(e.to_string()))?;

        let connection =
            tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
                .await
                .map_err(|_| StoreError::Timeout)?
                .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!(url = %config.url, prefix = %config.key_prefix, "Connected to Redis");

        Ok(Self {
            connection,
            config: Arc::new(config),
        })
    }

    /// Get the underlying connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    /// Open a bucket as its concrete type.
    pub fn redis_bucket<T: StoreValue>(&self, name: &str) -> RedisStore<T> {
        RedisStore {
            connection: self.connection.clone(),
            config: self.config.clone(),
            bucket: name.to_string(),
            _value: PhantomData,
        }
    }
}

impl StoreBackend for RedisBackend {
    fn bucket<T: StoreValue>(&self, name: &str) -> Arc<dyn Store<T>> {
        Arc::new(self.redis_bucket::<T>(name))
    }
}

/// One typed bucket on Redis.
///
/// Values are written in the tagged wire format (see [`crate::value`]).
/// Writes take a short per-key lock; a writer that finds the lock held
/// drops its write.
pub struct RedisStore<T> {
    connection: ConnectionManager,
    config: Arc<RedisStoreConfig>,
    bucket: String,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for RedisStore<T> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            config: self.config.clone(),
            bucket: self.bucket.clone(),
            _value: PhantomData,
        }
    }
}

impl<T: StoreValue> RedisStore<T> {
    fn build_key(&self, key: &str) -> String {
        self.config.build_key(&self.bucket, key)
    }

    async fn with_timeout<R, F>(&self, op: F) -> StoreResult<R>
    where
        F: Future<Output = redis::RedisResult<R>>,
    {
        tokio::time::timeout(self.config.operation_timeout, op)
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(StoreError::from)
    }

    async fn write(&self, key: &str, value: &T, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.connection.clone();

        match ttl {
            Some(ttl) if ttl.is_zero() => {
                let _: () = self.with_timeout(conn.del(key)).await?;
            }
            Some(ttl) => {
                let payload = encode(value)?;
                let _: () = self.with_timeout(conn.set_ex(key, payload, ttl_seconds(ttl))).await?;
            }
            None => {
                let payload = encode(value)?;
                let _: () = self.with_timeout(conn.set(key, payload)).await?;
            }
        }

        Ok(())
    }
}

/// Whole seconds for `EX`, rounded up so a sub-second TTL still expires.
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0))
}

#[async_trait]
impl<T: StoreValue> Store<T> for RedisStore<T> {
    async fn has(&self, keys: &[String]) -> StoreResult<bool> {
        if keys.is_empty() {
            return Ok(true);
        }

        let keys: Vec<String> = keys.iter().map(|key| self.build_key(key)).collect();
        let mut conn = self.connection.clone();
        let count: usize = self
            .with_timeout(redis::cmd("EXISTS").arg(&keys).query_async(&mut conn))
            .await?;

        Ok(count == keys.len())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<T>> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();

        let raw: Option<Vec<u8>> = self.with_timeout(conn.get(&key)).await?;
        raw.map(|raw| decode::<T>(&raw)).transpose()
    }

    async fn set(&self, key: &str, value: T, ttl: Option<Duration>) -> StoreResult<()> {
        let data_key = self.build_key(key);
        let lock = RedisLock::new(
            self.config.lock_key(&self.bucket, key),
            self.config.lock_ttl,
            self.connection.clone(),
        );

        let Some(guard) = lock.try_acquire().await? else {
            debug!(key = %data_key, "Write skipped, key is locked by another writer");
            return Ok(());
        };

        let written = self.write(&data_key, &value, ttl).await;

        match guard.release().await {
            Ok(()) => {}
            Err(LockError::NotHeld) => {
                warn!(key = %data_key, "Write lock expired before release");
            }
            Err(e) => return Err(e.into()),
        }

        written
    }

    async fn del(&self, keys: &[String]) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = keys.iter().map(|key| self.build_key(key)).collect();
        let mut conn = self.connection.clone();
        let _: () = self
            .with_timeout(redis::cmd("DEL").arg(&keys).query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();

        if ttl.is_zero() {
            let _: () = self.with_timeout(conn.del(&key)).await?;
        } else {
            let seconds = i64::try_from(ttl_seconds(ttl)).unwrap_or(i64::MAX);
            let _: () = self.with_timeout(conn.expire(&key, seconds)).await?;
        }
        Ok(())
    }
}
