//! Error types for the response cache.

use stowage_store::StoreError;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Response cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A sealed entry referenced a chunk the store no longer holds
    #[error("Missing chunk: {chunk_id}")]
    MissingChunk { chunk_id: String },

    /// The response sink rejected a write
    #[error("Response sink error: {0}")]
    Sink(#[from] std::io::Error),
}
