//! Fault injection for storage backends.
//!
//! [`FailingBackend`] wraps a real backend and fails chosen operations on
//! chosen buckets with [`StoreError::Connection`]. Faults can be switched on
//! and off while a cache is running; clones share the same fault set.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use stowage_store::{MemoryBackend, Store, StoreBackend, StoreError, StoreResult, StoreValue};

const ANY_BUCKET: &str = "*";

/// A store operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Has,
    Get,
    Set,
    Del,
    Expire,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Has => "has",
            Operation::Get => "get",
            Operation::Set => "set",
            Operation::Del => "del",
            Operation::Expire => "expire",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct Faults {
    armed: Mutex<HashSet<(String, Operation)>>,
    calls: Mutex<HashMap<(String, Operation), usize>>,
}

impl Faults {
    fn check(&self, bucket: &str, op: Operation) -> StoreResult<()> {
        *self
            .calls
            .lock()
            .entry((bucket.to_string(), op))
            .or_default() += 1;

        let armed = self.armed.lock();
        if armed.contains(&(bucket.to_string(), op))
            || armed.contains(&(ANY_BUCKET.to_string(), op))
        {
            return Err(StoreError::Connection(format!(
                "injected {} failure on bucket {}",
                op, bucket
            )));
        }
        Ok(())
    }
}

/// A backend whose buckets fail on demand.
#[derive(Clone)]
pub struct FailingBackend<B> {
    inner: B,
    faults: Arc<Faults>,
}

impl FailingBackend<MemoryBackend> {
    /// Wrap a fresh in-memory backend.
    pub fn memory() -> Self {
        Self::new(MemoryBackend::default())
    }
}

impl<B: StoreBackend> FailingBackend<B> {
    /// Wrap `inner`. No faults are armed.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Fail `op` on the bucket named `bucket`.
    pub fn fail(&self, bucket: &str, op: Operation) -> &Self {
        self.faults.armed.lock().insert((bucket.to_string(), op));
        self
    }

    /// Fail `op` on every bucket.
    pub fn fail_all(&self, op: Operation) -> &Self {
        self.fail(ANY_BUCKET, op)
    }

    /// Disarm every fault.
    pub fn heal(&self) {
        self.faults.armed.lock().clear();
    }

    /// How many times `op` was attempted on `bucket`, failed or not.
    pub fn calls(&self, bucket: &str, op: Operation) -> usize {
        self.faults
            .calls
            .lock()
            .get(&(bucket.to_string(), op))
            .copied()
            .unwrap_or(0)
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: StoreBackend> StoreBackend for FailingBackend<B> {
    fn bucket<T: StoreValue>(&self, name: &str) -> Arc<dyn Store<T>> {
        Arc::new(FailingStore {
            inner: self.inner.bucket(name),
            bucket: name.to_string(),
            faults: self.faults.clone(),
        })
    }
}

/// One bucket of a [`FailingBackend`].
pub struct FailingStore<T: StoreValue> {
    inner: Arc<dyn Store<T>>,
    bucket: String,
    faults: Arc<Faults>,
}

#[async_trait]
impl<T: StoreValue> Store<T> for FailingStore<T> {
    async fn has(&self, keys: &[String]) -> StoreResult<bool> {
        self.faults.check(&self.bucket, Operation::Has)?;
        self.inner.has(keys).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<T>> {
        self.faults.check(&self.bucket, Operation::Get)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: T, ttl: Option<Duration>) -> StoreResult<()> {
        self.faults.check(&self.bucket, Operation::Set)?;
        self.inner.set(key, value, ttl).await
    }

    async fn del(&self, keys: &[String]) -> StoreResult<()> {
        self.faults.check(&self.bucket, Operation::Del)?;
        self.inner.del(keys).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        self.faults.check(&self.bucket, Operation::Expire)?;
        self.inner.expire(key, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_faults_are_scoped_to_bucket_and_operation() {
        let backend = FailingBackend::memory();
        let tags = backend.bucket::<String>("tags");
        let chunks = backend.bucket::<bytes::Bytes>("chunks");

        backend.fail("tags", Operation::Set);

        let err = tags.set("t", "GET:/".to_string(), None).await.unwrap_err();
        assert!(matches!(err, StoreError::Connection(_)));
        assert!(err.to_string().contains("set"));

        chunks.set("c", bytes::Bytes::from_static(b"x"), None).await.unwrap();
        assert_eq!(tags.get("t").await.unwrap(), None);

        backend.heal();
        tags.set("t", "GET:/".to_string(), None).await.unwrap();
        assert_eq!(tags.get("t").await.unwrap(), Some("GET:/".to_string()));
        assert_eq!(backend.calls("tags", Operation::Set), 2);
    }

    #[tokio::test]
    async fn test_fail_all_and_shared_clones() {
        let backend = FailingBackend::memory();
        let handle = backend.clone();
        let responses = backend.bucket::<String>("responses");

        handle.fail_all(Operation::Get);
        assert!(responses.get("k").await.is_err());
        assert!(responses.has(&[]).await.unwrap());

        handle.heal();
        assert_eq!(responses.get("k").await.unwrap(), None);
    }
}
