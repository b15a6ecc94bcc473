//! In-memory LRU store.

use crate::config::MemoryStoreConfig;
use crate::error::StoreResult;
use crate::traits::{Store, StoreBackend};
use crate::value::StoreValue;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

struct Slot<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Slot<T> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// A bounded, TTL-aware in-process store.
///
/// Entries expire lazily: an expired entry is dropped the next time it is
/// touched. When the bucket is full the least recently used entry is
/// evicted.
pub struct MemoryStore<T> {
    entries: Mutex<LruCache<String, Slot<T>>>,
}

impl<T: StoreValue> MemoryStore<T> {
    /// Create a new store.
    pub fn new(config: MemoryStoreConfig) -> Self {
        let entries = match config.max_entries.and_then(NonZeroUsize::new) {
            Some(max) => LruCache::new(max),
            None => LruCache::unbounded(),
        };

        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, slot)| !slot.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            entries.pop(&key);
        }
        entries.len()
    }

    /// Whether the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(entries: &mut LruCache<String, Slot<T>>, key: &str, now: Instant) -> bool {
        match entries.peek(key) {
            Some(slot) if slot.is_live(now) => true,
            Some(_) => {
                entries.pop(key);
                false
            }
            None => false,
        }
    }
}

impl<T: StoreValue> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

#[async_trait]
impl<T: StoreValue> Store<T> for MemoryStore<T> {
    async fn has(&self, keys: &[String]) -> StoreResult<bool> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        Ok(keys.iter().all(|key| Self::contains(&mut entries, key, now)))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<T>> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some(slot) if slot.is_live(now) => Ok(Some(slot.value.clone())),
            Some(_) => {
                trace!(key = %key, "Dropping expired entry");
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: T, ttl: Option<Duration>) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            entries.pop(key);
            return Ok(());
        }

        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        entries.put(key.to_string(), Slot { value, expires_at });
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        for key in keys {
            entries.pop(key);
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        if ttl.is_zero() {
            entries.pop(key);
            return Ok(());
        }

        let now = Instant::now();
        if Self::contains(&mut entries, key, now)
            && let Some(slot) = entries.peek_mut(key)
        {
            slot.expires_at = now.checked_add(ttl);
        }
        Ok(())
    }
}

type BucketKey = (String, TypeId);

/// A [`StoreBackend`] handing out [`MemoryStore`] buckets.
///
/// Cloning the backend shares its buckets.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    config: MemoryStoreConfig,
    buckets: Arc<Mutex<HashMap<BucketKey, Arc<dyn Any + Send + Sync>>>>,
}

impl MemoryBackend {
    /// Create a backend whose buckets use `config`.
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            buckets: Arc::default(),
        }
    }

    /// Open a bucket as its concrete type.
    pub fn memory_bucket<T: StoreValue>(&self, name: &str) -> Arc<MemoryStore<T>> {
        let mut buckets = self.buckets.lock();
        let key = (name.to_string(), TypeId::of::<T>());

        if let Some(existing) = buckets.get(&key)
            && let Ok(store) = Arc::clone(existing).downcast::<MemoryStore<T>>()
        {
            return store;
        }

        let store = Arc::new(MemoryStore::<T>::new(self.config.clone()));
        buckets.insert(key, store.clone());
        store
    }
}

impl StoreBackend for MemoryBackend {
    fn bucket<T: StoreValue>(&self, name: &str) -> Arc<dyn Store<T>> {
        self.memory_bucket::<T>(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::<String>::default();

        store.set("key", "value".to_string(), None).await.unwrap();
        assert_eq!(store.get("key").await.unwrap(), Some("value".to_string()));

        store.del(&keys(&["key"])).await.unwrap();
        assert_eq!(store.get("key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_has_requires_every_key() {
        let store = MemoryStore::<Bytes>::default();
        store.set("a", Bytes::from_static(b"1"), None).await.unwrap();
        store.set("b", Bytes::from_static(b"2"), None).await.unwrap();

        assert!(store.has(&keys(&["a", "b"])).await.unwrap());
        assert!(!store.has(&keys(&["a", "b", "c"])).await.unwrap());
        assert!(store.has(&[]).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::<String>::default();
        store
            .set("key", "value".to_string(), Some(Duration::from_secs(2)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("key").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("key").await.unwrap().is_none());
        assert!(!store.has(&keys(&["key"])).await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_ttl_deletes() {
        let store = MemoryStore::<String>::default();
        store.set("key", "value".to_string(), None).await.unwrap();
        store.set("key", "other".to_string(), Some(Duration::ZERO)).await.unwrap();
        assert_eq!(store.get("key").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_ttl_never_expires() {
        let store = MemoryStore::<String>::default();
        store
            .set("set", "value".to_string(), Some(Duration::MAX))
            .await
            .unwrap();
        store.set("expire", "value".to_string(), None).await.unwrap();
        store.expire("expire", Duration::MAX).await.unwrap();

        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(store.has(&keys(&["set", "expire"])).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire() {
        let store = MemoryStore::<String>::default();
        store.set("key", "value".to_string(), None).await.unwrap();

        store.expire("key", Duration::from_secs(3600)).await.unwrap();
        assert!(store.get("key").await.unwrap().is_some());

        store.expire("key", Duration::ZERO).await.unwrap();
        assert!(store.get("key").await.unwrap().is_none());

        // Missing keys are ignored
        store.expire("missing", Duration::from_secs(1)).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let store = MemoryStore::<String>::new(MemoryStoreConfig::new().with_max_entries(2));
        store.set("a", "1".to_string(), None).await.unwrap();
        store.set("b", "2".to_string(), None).await.unwrap();

        // Touch "a" so "b" becomes least recently used
        store.get("a").await.unwrap();
        store.set("c", "3".to_string(), None).await.unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get("a").await.unwrap().is_some());
        assert!(store.get("b").await.unwrap().is_none());
        assert!(store.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_backend_shares_buckets_by_name_and_type() {
        let backend = MemoryBackend::default();
        let first = backend.bucket::<String>("tags");
        let second = backend.bucket::<String>("tags");
        let other = backend.bucket::<String>("responses");

        first.set("users", "GET:/users".to_string(), None).await.unwrap();
        assert_eq!(second.get("users").await.unwrap(), Some("GET:/users".to_string()));
        assert_eq!(other.get("users").await.unwrap(), None);

        let cloned = backend.clone();
        assert!(cloned.bucket::<String>("tags").has(&keys(&["users"])).await.unwrap());
    }
}
