//! Stored response entries and chunk identities.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use stowage_store::value::{from_json_payload, to_json_payload};
use stowage_store::{StoreResult, StoreValue, ValueKind};

/// TTL of an entry that has not been sealed yet.
pub const INCOMPLETE_ENTRY_TTL: Duration = Duration::from_secs(10);

/// How much longer chunks live than the entry that references them.
pub const CHUNK_TTL_EXTENSION: Duration = Duration::from_secs(60);

/// Delay between purging an entry and deleting its chunks.
pub const CHUNK_PURGE_DELAY: Duration = Duration::from_secs(60);

/// Response headers as stored: lower-case name to ordered values.
pub type StoredHeaders = BTreeMap<String, Vec<String>>;

/// A captured response.
///
/// Created unsealed by the first cacheable chunk of a response and sealed
/// once by the same producer when the response completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// The producer that owns this entry
    pub request_id: String,

    /// Chunk ids in emission order
    pub chunks: Vec<String>,

    /// Response status code
    pub status: u16,

    /// Response headers
    pub headers: StoredHeaders,

    /// Lifetime in seconds; `None` is unbounded
    pub max_age: Option<u64>,

    /// Whether the entry is complete and may be served
    pub is_sealed: bool,
}

impl CacheEntry {
    /// A fresh, unsealed entry owned by `request_id`.
    pub fn incomplete(request_id: impl Into<String>, max_age: Option<Duration>) -> Self {
        Self {
            request_id: request_id.into(),
            chunks: Vec::new(),
            status: 200,
            headers: StoredHeaders::new(),
            max_age: max_age.map(|age| age.as_secs()),
            is_sealed: false,
        }
    }

    /// Lifetime as a duration.
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age.map(Duration::from_secs)
    }

    /// Lifetime of the chunks referenced by this entry.
    pub fn chunk_ttl(&self) -> Option<Duration> {
        chunk_ttl(self.max_age())
    }
}

impl StoreValue for CacheEntry {
    const KIND: ValueKind = ValueKind::Object;

    fn to_payload(&self) -> StoreResult<Bytes> {
        to_json_payload(self)
    }

    fn from_payload(payload: Bytes) -> StoreResult<Self> {
        from_json_payload(&payload)
    }
}

/// Chunk lifetime for an entry lifetime of `max_age`.
pub fn chunk_ttl(max_age: Option<Duration>) -> Option<Duration> {
    max_age.map(|age| age.saturating_add(CHUNK_TTL_EXTENSION))
}

/// Deterministic id of a chunk: `<cache_key>:<sha256 hex of the bytes>`.
pub fn chunk_id(cache_key: &str, chunk: &[u8]) -> String {
    let digest = Sha256::digest(chunk);
    format!("{}:{}", cache_key, hex::encode(digest))
}
