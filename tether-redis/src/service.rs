//! Pooled Redis service with the key and hash commands used by sessions.

use redis::AsyncCommands;
use std::time::Duration;

use crate::{
    RedisConfig, RedisError, Result,
    pool::{RedisConnection, RedisPool, RedisPoolBuilder},
};

/// Redis service providing a connection pool and convenience methods.
///
/// Every method checks a connection out of the pool, issues one command
/// (or one transaction) and returns the connection.
pub struct RedisService {
    config: RedisConfig,
    pool: RedisPool,
}

impl RedisService {
    /// Create a new Redis service.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let pool = RedisPoolBuilder::new(config.clone()).build().await?;
        Ok(Self { config, pool })
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> Result<RedisConnection<'_>> {
        let conn = self.pool.get().await?;
        Ok(RedisConnection::new(conn))
    }

    /// Delete a key.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.get().await?;
        let deleted: u32 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    /// Check if a key exists.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.get().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    /// Get TTL of a key.
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.get().await?;
        let ttl: i64 = conn.ttl(key).await?;
        if ttl < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_secs(ttl as u64)))
        }
    }

    /// Hash get of a single binary field.
    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.get().await?;
        let value: Option<Vec<u8>> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut *conn)
            .await?;
        Ok(value)
    }

    /// Hash get of several binary fields, in request order.
    pub async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.get().await?;
        let values: Vec<Option<Vec<u8>>> = redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut *conn)
            .await?;
        Ok(values)
    }

    /// `HSET` several binary fields and reset the key's TTL in one
    /// `MULTI`/`EXEC` transaction.
    ///
    /// Sub-second durations are rounded up to one second. Durations beyond
    /// what `EXPIRE` accepts fail with [`RedisError::Config`] before anything
    /// is sent.
    pub async fn hset_with_expire(
        &self,
        key: &str,
        fields: &[(&str, &[u8])],
        ttl: Duration,
    ) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let secs = expire_secs(ttl)?;

        let mut pipe = redis::pipe();
        pipe.atomic().cmd("HSET").arg(key);
        for (field, value) in fields {
            pipe.arg(*field).arg(*value);
        }
        pipe.ignore().cmd("EXPIRE").arg(key).arg(secs).ignore();

        let mut conn = self.get().await?;
        let () = pipe.query_async(&mut *conn).await?;
        Ok(())
    }

    /// Hash field names.
    pub async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.get().await?;
        let keys: Vec<String> = conn.hkeys(key).await?;
        Ok(keys)
    }

    /// Hash delete of several fields.
    pub async fn hdel(&self, key: &str, fields: &[&str]) -> Result<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get().await?;
        let removed: u64 = redis::cmd("HDEL")
            .arg(key)
            .arg(fields)
            .query_async(&mut *conn)
            .await?;
        Ok(removed)
    }
}

/// Whole seconds for `EXPIRE`.
fn expire_secs(ttl: Duration) -> Result<i64> {
    i64::try_from(ttl.as_secs().max(1))
        .map_err(|_| RedisError::Config(format!("TTL of {}s is out of range", ttl.as_secs())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expire_secs() {
        assert_eq!(expire_secs(Duration::from_millis(200)).unwrap(), 1);
        assert_eq!(expire_secs(Duration::from_secs(1800)).unwrap(), 1800);
        assert_eq!(
            expire_secs(Duration::from_secs(i64::MAX as u64)).unwrap(),
            i64::MAX
        );
        assert!(matches!(
            expire_secs(Duration::from_secs(u64::MAX)),
            Err(RedisError::Config(_))
        ));
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_hash_operations() {
        let config = RedisConfig::from_env().build();
        let redis = RedisService::new(config).await.unwrap();
        let key = "tether:test:hash";

        redis
            .hset_with_expire(
                key,
                &[("a", b"1".as_slice()), ("b", b"two".as_slice())],
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert!(redis.exists(key).await.unwrap());

        let ttl = redis.ttl(key).await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(60));

        let values = redis.hmget(key, &["a", "missing", "b"]).await.unwrap();
        assert_eq!(values, vec![Some(b"1".to_vec()), None, Some(b"two".to_vec())]);

        let mut keys = redis.hkeys(key).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        assert_eq!(redis.hdel(key, &["a"]).await.unwrap(), 1);
        assert_eq!(redis.hget(key, "a").await.unwrap(), None);

        assert!(redis.delete(key).await.unwrap());
        assert!(!redis.exists(key).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_out_of_range_ttl_leaves_key_untouched() {
        let config = RedisConfig::from_env().build();
        let redis = RedisService::new(config).await.unwrap();
        let key = "tether:test:ttl-range";

        let err = redis
            .hset_with_expire(key, &[("a", b"1".as_slice())], Duration::from_secs(u64::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, RedisError::Config(_)));
        assert!(!redis.exists(key).await.unwrap());
    }
}
