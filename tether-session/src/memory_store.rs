//! In-process hash store.
//!
//! Mirrors the Redis hash semantics the session layer relies on, including
//! TTL expiry on [`tokio::time::Instant`], so it can stand in for Redis in
//! single-process deployments and tests.
//!
//! Expired keys are invisible to reads at once. Their memory is reclaimed
//! by a sweep that runs every [`PURGE_INTERVAL`] writes, or on demand with
//! [`MemoryHashStore::purge_expired`].

use crate::error::SessionResult;
use crate::store::HashStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Number of writes between sweeps of expired keys.
pub const PURGE_INTERVAL: u64 = 256;

/// In-memory [`HashStore`].
#[derive(Clone, Default)]
pub struct MemoryHashStore {
    data: Arc<RwLock<HashMap<String, HashEntry>>>,
    writes: Arc<AtomicU64>,
}

#[derive(Clone, Default)]
struct HashEntry {
    fields: HashMap<String, Vec<u8>>,
    expires_at: Option<Instant>,
}

impl HashEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

impl MemoryHashStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.data
            .read()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    /// Whether the store holds no live keys.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired keys, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut data = self.data.write().await;
        purge(&mut data, Instant::now())
    }

    async fn read_live<T>(&self, key: &str, f: impl FnOnce(&HashEntry) -> T) -> Option<T> {
        let data = self.data.read().await;
        data.get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(f)
    }
}

fn purge(data: &mut HashMap<String, HashEntry>, now: Instant) -> usize {
    let before = data.len();
    data.retain(|_, entry| entry.is_live(now));
    let removed = before - data.len();
    if removed > 0 {
        debug!(removed, remaining = data.len(), "Purged expired session hashes");
    }
    removed
}

#[async_trait]
impl HashStore for MemoryHashStore {
    async fn exists(&self, key: &str) -> SessionResult<bool> {
        Ok(self.read_live(key, |_| ()).await.is_some())
    }

    async fn hget(&self, key: &str, field: &str) -> SessionResult<Option<Vec<u8>>> {
        Ok(self
            .read_live(key, |entry| entry.fields.get(field).cloned())
            .await
            .flatten())
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> SessionResult<Vec<Option<Vec<u8>>>> {
        let values = self
            .read_live(key, |entry| {
                fields
                    .iter()
                    .map(|field| entry.fields.get(*field).cloned())
                    .collect()
            })
            .await;
        Ok(values.unwrap_or_else(|| vec![None; fields.len()]))
    }

    async fn hset_with_expire(
        &self,
        key: &str,
        fields: &[(&str, &[u8])],
        ttl: Duration,
    ) -> SessionResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write().await;
        let now = Instant::now();

        let entry = data.entry(key.to_string()).or_default();
        if !entry.is_live(now) {
            *entry = HashEntry::default();
        }
        for (field, value) in fields {
            entry.fields.insert(field.to_string(), value.to_vec());
        }
        // Beyond the clock's range the key simply never expires
        entry.expires_at = now.checked_add(ttl);

        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % PURGE_INTERVAL == 0 {
            purge(&mut data, now);
        }
        Ok(())
    }

    async fn hkeys(&self, key: &str) -> SessionResult<Vec<String>> {
        Ok(self
            .read_live(key, |entry| entry.fields.keys().cloned().collect())
            .await
            .unwrap_or_default())
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> SessionResult<()> {
        let mut data = self.data.write().await;
        let now = Instant::now();
        let emptied = match data.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                for field in fields {
                    entry.fields.remove(*field);
                }
                entry.fields.is_empty()
            }
            Some(_) => true,
            None => false,
        };
        // Redis drops a hash once its last field goes
        if emptied {
            data.remove(key);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> SessionResult<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .read_live(key, |entry| entry.expires_at.map(|exp| exp.duration_since(now)))
            .await
            .flatten())
    }
}
