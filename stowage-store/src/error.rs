//! Error types for store operations.

use thiserror::Error;

#[cfg(feature = "redis")]
use crate::lock::LockError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store-specific errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The per-key write lock could not be taken or released
    #[cfg(feature = "redis")]
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A stored value carried a type tag this build does not know
    #[error("Unknown value kind: {0:?}")]
    UnknownValueKind(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,
}
