//! Hash store trait definition.

use crate::error::SessionResult;
use async_trait::async_trait;
use std::time::Duration;

/// The hash-per-key operations a session view needs from its backing store.
///
/// Semantics follow Redis: a key exists while its hash has at least one
/// field, writing a field to a missing key creates it, and expired keys
/// behave as if they were never written.
#[async_trait]
pub trait HashStore: Send + Sync {
    /// Check if a key exists.
    async fn exists(&self, key: &str) -> SessionResult<bool>;

    /// Get one field.
    async fn hget(&self, key: &str, field: &str) -> SessionResult<Option<Vec<u8>>>;

    /// Get several fields, returned in request order.
    async fn hmget(&self, key: &str, fields: &[&str]) -> SessionResult<Vec<Option<Vec<u8>>>>;

    /// Set several fields and reset the key's time-to-live in one atomic
    /// write. An empty `fields` is a no-op.
    async fn hset_with_expire(
        &self,
        key: &str,
        fields: &[(&str, &[u8])],
        ttl: Duration,
    ) -> SessionResult<()>;

    /// List field names.
    async fn hkeys(&self, key: &str) -> SessionResult<Vec<String>>;

    /// Delete fields. Missing fields are ignored.
    async fn hdel(&self, key: &str, fields: &[&str]) -> SessionResult<()>;

    /// Delete the whole key. Missing keys are ignored.
    async fn delete(&self, key: &str) -> SessionResult<()>;

    /// Remaining time-to-live, or `None` for a missing key or one without
    /// expiry.
    async fn ttl(&self, key: &str) -> SessionResult<Option<Duration>>;
}
