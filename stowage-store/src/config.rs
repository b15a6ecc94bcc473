//! Store configuration types.

use std::time::Duration;

/// Default Redis key prefix.
pub const DEFAULT_KEY_PREFIX: &str = "cache";

/// Default TTL of the per-key write lock.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_millis(5000);

/// In-memory store configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStoreConfig {
    /// Maximum number of entries per bucket; `None` is unbounded
    pub max_entries: Option<usize>,
}

impl MemoryStoreConfig {
    /// Create an unbounded configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound each bucket to `max` entries, evicting the least recently used.
    ///
    /// A bound of zero is treated as unbounded.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = (max > 0).then_some(max);
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Reads `STOWAGE_MEMORY_MAX_ENTRIES`; unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Ok(max) = std::env::var("STOWAGE_MEMORY_MAX_ENTRIES")
            && let Ok(max) = max.trim().parse::<usize>()
        {
            config = config.with_max_entries(max);
        }

        config
    }
}

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Connection URL
    pub url: String,

    /// Prefix for every key written by this store
    pub key_prefix: String,

    /// TTL of the per-key write lock
    pub lock_ttl: Duration,

    /// Connection timeout
    pub connection_timeout: Duration,

    /// Operation timeout
    pub operation_timeout: Duration,
}

impl RedisStoreConfig {
    /// Create a new Redis store configuration.
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Examples
    ///
    /// ```
    /// use stowage_store::RedisStoreConfig;
    ///
    /// let config = RedisStoreConfig::redis("redis://localhost:6379");
    /// assert_eq!(config.key_prefix, "cache");
    /// ```
    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            lock_ttl: DEFAULT_LOCK_TTL,
            connection_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(3),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Reads `REDIS_URL` (default `redis://127.0.0.1:6379`),
    /// `STOWAGE_REDIS_PREFIX` and `STOWAGE_REDIS_LOCK_TTL_MS`.
    pub fn from_env() -> Self {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let mut config = Self::redis(url);

        if let Ok(prefix) = std::env::var("STOWAGE_REDIS_PREFIX") {
            config = config.with_key_prefix(prefix);
        }

        if let Ok(ttl) = std::env::var("STOWAGE_REDIS_LOCK_TTL_MS")
            && let Ok(ms) = ttl.trim().parse::<u64>()
        {
            config = config.with_lock_ttl(Duration::from_millis(ms));
        }

        config
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the lock TTL.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the operation timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Prefix shared by every key of one bucket.
    pub fn bucket_prefix(&self, bucket: &str) -> String {
        if self.key_prefix.is_empty() {
            bucket.to_string()
        } else {
            format!("{}:{}", self.key_prefix, bucket)
        }
    }

    /// Build the data key for `key` in `bucket`.
    pub fn build_key(&self, bucket: &str, key: &str) -> String {
        format!("{}:{}", self.bucket_prefix(bucket), key)
    }

    /// Build the lock key guarding `key` in `bucket`.
    pub fn lock_key(&self, bucket: &str, key: &str) -> String {
        format!("{}:locks:{}", self.bucket_prefix(bucket), key)
    }
}
