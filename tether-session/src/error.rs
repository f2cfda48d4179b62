//! Error types for session operations.

use crate::attribute::TypeTag;
use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session-specific errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Redis-specific error, passed through unmodified
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] tether_redis::RedisError),

    /// Error reported by a [`HashStore`](crate::HashStore) implementation
    /// other than the Redis one
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Stored value has no module/type fields to rebuild it from
    #[error("Missing type metadata for stored attribute")]
    MissingTypeMetadata,

    /// Stored type tag was never registered
    #[error("Unknown attribute type: {0}")]
    UnknownAttributeType(TypeTag),

    /// Binary payload with an unrecognized envelope
    #[error("Unsupported attribute format: {0}")]
    UnsupportedFormat(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
