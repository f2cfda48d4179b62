//! Redis hash store.

use crate::error::SessionResult;
use crate::store::HashStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tether_redis::{RedisConfig, RedisService};

/// [`HashStore`] backed by a pooled [`RedisService`].
///
/// Redis errors are passed through unchanged as
/// [`SessionError::Redis`](crate::SessionError::Redis); nothing is retried.
#[derive(Clone)]
pub struct RedisHashStore {
    redis: Arc<RedisService>,
}

impl RedisHashStore {
    /// Wrap an existing service, e.g. one shared with other components.
    pub fn new(redis: Arc<RedisService>) -> Self {
        Self { redis }
    }

    /// Connect a new pool from configuration.
    pub async fn connect(config: RedisConfig) -> SessionResult<Self> {
        let redis = RedisService::new(config).await?;
        Ok(Self::new(Arc::new(redis)))
    }

    /// The underlying service.
    pub fn service(&self) -> &Arc<RedisService> {
        &self.redis
    }
}

#[async_trait]
impl HashStore for RedisHashStore {
    async fn exists(&self, key: &str) -> SessionResult<bool> {
        Ok(self.redis.exists(key).await?)
    }

    async fn hget(&self, key: &str, field: &str) -> SessionResult<Option<Vec<u8>>> {
        Ok(self.redis.hget(key, field).await?)
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> SessionResult<Vec<Option<Vec<u8>>>> {
        Ok(self.redis.hmget(key, fields).await?)
    }

    async fn hset_with_expire(
        &self,
        key: &str,
        fields: &[(&str, &[u8])],
        ttl: Duration,
    ) -> SessionResult<()> {
        Ok(self.redis.hset_with_expire(key, fields, ttl).await?)
    }

    async fn hkeys(&self, key: &str) -> SessionResult<Vec<String>> {
        Ok(self.redis.hkeys(key).await?)
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> SessionResult<()> {
        self.redis.hdel(key, fields).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        self.redis.delete(key).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> SessionResult<Option<Duration>> {
        Ok(self.redis.ttl(key).await?)
    }
}
