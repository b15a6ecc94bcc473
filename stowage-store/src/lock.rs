//! Per-key write locks on Redis.

use redis::aio::ConnectionManager;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

const RELEASE_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

/// Lock errors.
///
/// Contention is not an error: [`RedisLock::try_acquire`] reports it as
/// `Ok(None)`.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Lock not held")]
    NotHeld,
}

/// Lock guard that releases the lock on drop.
pub struct LockGuard {
    key: String,
    token: String,
    conn: ConnectionManager,
    released: bool,
}

impl LockGuard {
    fn new(key: String, token: String, conn: ConnectionManager) -> Self {
        Self {
            key,
            token,
            conn,
            released: false,
        }
    }

    /// Release the lock.
    ///
    /// Fails with [`LockError::NotHeld`] if the lock expired and was taken
    /// over (or removed) in the meantime.
    pub async fn release(mut self) -> Result<(), LockError> {
        self.released = true;

        let result: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut self.conn)
            .await?;

        if result == 1 {
            debug!(lock = %self.key, "Released lock");
            Ok(())
        } else {
            warn!(lock = %self.key, "Failed to release lock (not held or expired)");
            Err(LockError::NotHeld)
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // Best effort release when the holder was cancelled
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let key = self.key.clone();
        let token = self.token.clone();
        let mut conn = self.conn.clone();

        handle.spawn(async move {
            let _: Result<i32, _> = redis::Script::new(RELEASE_SCRIPT)
                .key(&key)
                .arg(&token)
                .invoke_async(&mut conn)
                .await;
        });
    }
}

/// Redis-based lock on a single key.
pub struct RedisLock {
    key: String,
    ttl: Duration,
    conn: ConnectionManager,
}

impl RedisLock {
    /// Create a new lock. Nothing is sent to Redis until it is acquired.
    pub fn new(key: impl Into<String>, ttl: Duration, conn: ConnectionManager) -> Self {
        Self {
            key: key.into(),
            ttl,
            conn,
        }
    }

    /// Get the lock key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Try to acquire the lock without waiting.
    pub async fn try_acquire(&self) -> Result<Option<LockGuard>, LockError> {
        let token = Uuid::new_v4().to_string();
        let ttl_ms = self.ttl.as_millis().max(1) as u64;

        let mut conn = self.conn.clone();

        // SET NX PX: atomic acquire with expiry
        let result: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        if result.is_some() {
            debug!(lock = %self.key, "Acquired lock");
            Ok(Some(LockGuard::new(self.key.clone(), token, conn)))
        } else {
            debug!(lock = %self.key, "Lock already held");
            Ok(None)
        }
    }
}
