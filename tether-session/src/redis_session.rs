//! Redis hash-backed sessions.
//!
//! Each session is one hash under `key_prefix + id`:
//!
//! | Field                | Content |
//! |----------------------|---------|
//! | `creation_time`      | seconds since the epoch, decimal text |
//! | `last_accessed_time` | seconds since the epoch, decimal text |
//! | `val_<name>`         | serialized attribute |
//! | `mod_<name>`         | attribute type module (metadata serializer only) |
//! | `clz_<name>`         | attribute type name (metadata serializer only) |
//!
//! The hash existing is what makes the session valid. Expiry is left to
//! the store's TTL, which is reset every time a session is opened.

use crate::attribute::{Attribute, TypeTag};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::memory_store::MemoryHashStore;
use crate::serializer::{EncodedAttribute, JsonObjectSerializer, ObjectSerializer};
use crate::store::HashStore;
use crate::traits::{Session, SessionFactory, generate_session_id};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, Span, debug, info_span, warn};

#[cfg(feature = "redis")]
use crate::redis_store::RedisHashStore;
#[cfg(feature = "redis")]
use tether_redis::RedisService;

const CREATION_TIME: &str = "creation_time";
const LAST_ACCESSED_TIME: &str = "last_accessed_time";
const VALUE_PREFIX: &str = "val_";
const MODULE_PREFIX: &str = "mod_";
const TYPE_PREFIX: &str = "clz_";

fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn secs_to_datetime(secs: f64) -> DateTime<Utc> {
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1_000_000_000.0).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos).unwrap_or_default()
}

/// Field names for one attribute.
struct AttributeFields {
    value: String,
    module: String,
    type_name: String,
}

impl AttributeFields {
    fn new(name: &str) -> Self {
        Self {
            value: format!("{}{}", VALUE_PREFIX, name),
            module: format!("{}{}", MODULE_PREFIX, name),
            type_name: format!("{}{}", TYPE_PREFIX, name),
        }
    }

    fn all(&self) -> [&str; 3] {
        [self.value.as_str(), self.module.as_str(), self.type_name.as_str()]
    }
}

fn utf8_field(bytes: Vec<u8>, field: &str) -> SessionResult<String> {
    String::from_utf8(bytes)
        .map_err(|e| SessionError::Deserialization(format!("{} is not UTF-8: {}", field, e)))
}

/// A view over one session hash.
///
/// Holds no session state besides its identity: every accessor reads the
/// store. Cloning is cheap and clones observe the same hash.
#[derive(Clone)]
pub struct RedisSession {
    id: String,
    key: String,
    opened_at: f64,
    is_new: bool,
    max_inactive_interval: Duration,
    store: Arc<dyn HashStore>,
    serializer: Arc<dyn ObjectSerializer>,
    span: Span,
}

impl RedisSession {
    /// Open a view, creating the hash if needed, stamping the access time
    /// and resetting the TTL.
    async fn open(session_id: Option<&str>, factory: &RedisSessionFactory) -> SessionResult<Self> {
        let id = match session_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => generate_session_id(),
        };
        let key = factory.config.session_key(&id);
        let opened_at = now_secs();
        let max_inactive_interval = factory.config.max_inactive_interval;
        let store = Arc::clone(&factory.store);

        let is_new = !store.exists(&key).await?;
        let stamp = opened_at.to_string();
        let mut fields: Vec<(&str, &[u8])> = vec![(LAST_ACCESSED_TIME, stamp.as_bytes())];
        if is_new {
            fields.push((CREATION_TIME, stamp.as_bytes()));
        }
        store
            .hset_with_expire(&key, &fields, max_inactive_interval)
            .await?;

        debug!(session_id = %id, is_new, "Session opened");

        Ok(Self {
            id,
            key,
            opened_at,
            is_new,
            max_inactive_interval,
            store,
            serializer: Arc::clone(&factory.serializer),
            span: factory.span.clone(),
        })
    }

    fn traced<F: Future>(&self, fut: F) -> tracing::instrument::Instrumented<F> {
        fut.instrument(self.span.clone())
    }

    /// The hash key backing this session.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Time this view was opened, in seconds since the epoch.
    pub fn opened_at(&self) -> f64 {
        self.opened_at
    }

    async fn read_timestamp(&self, field: &str) -> SessionResult<Option<f64>> {
        let Some(raw) = self.store.hget(&self.key, field).await? else {
            return Ok(None);
        };
        let parsed = std::str::from_utf8(&raw)
            .ok()
            .and_then(|text| text.trim().parse::<f64>().ok());
        if parsed.is_none() {
            debug!(session_id = %self.id, field, "Unparsable session timestamp");
        }
        Ok(parsed)
    }

    async fn timestamp_or_fallback(&self, field: &str) -> f64 {
        match self.read_timestamp(field).await {
            Ok(Some(secs)) => secs,
            Ok(None) => self.opened_at,
            Err(e) => {
                warn!(session_id = %self.id, field, error = %e, "Falling back to local timestamp");
                self.opened_at
            }
        }
    }

    /// Stored creation time, distinguishing a missing or unparsable field
    /// (`Ok(None)`) from a store failure (`Err`).
    pub async fn try_creation_time(&self) -> SessionResult<Option<f64>> {
        self.traced(self.read_timestamp(CREATION_TIME)).await
    }

    /// Stored last access time, with the same error reporting as
    /// [`try_creation_time`](Self::try_creation_time).
    pub async fn try_last_accessed_time(&self) -> SessionResult<Option<f64>> {
        self.traced(self.read_timestamp(LAST_ACCESSED_TIME)).await
    }

    /// Creation time as a UTC datetime.
    pub async fn created_at(&self) -> DateTime<Utc> {
        secs_to_datetime(self.creation_time().await)
    }

    /// Last access time as a UTC datetime.
    pub async fn last_accessed_at(&self) -> DateTime<Utc> {
        secs_to_datetime(self.last_accessed_time().await)
    }

    async fn load_attribute(&self, name: &str) -> SessionResult<Option<Attribute>> {
        let fields = AttributeFields::new(name);
        let mut values = self.store.hmget(&self.key, &fields.all()).await?.into_iter();

        let Some(value) = values.next().flatten() else {
            return Ok(None);
        };
        let type_tag = match (values.next().flatten(), values.next().flatten()) {
            (Some(module), Some(type_name)) => Some(TypeTag::new(
                utf8_field(module, &fields.module)?,
                utf8_field(type_name, &fields.type_name)?,
            )),
            _ => None,
        };

        debug!(
            session_id = %self.id,
            attribute = name,
            type_tag = ?type_tag.as_ref().map(ToString::to_string),
            bytes = value.len(),
            "Loading session attribute"
        );

        let attribute = self.serializer.decode(EncodedAttribute { value, type_tag })?;
        Ok(Some(attribute))
    }

    async fn store_attribute(&self, name: &str, value: Attribute) -> SessionResult<()> {
        let encoded = self.serializer.encode(&value)?;
        let fields = AttributeFields::new(name);

        let mut writes: Vec<(&str, &[u8])> =
            vec![(fields.value.as_str(), encoded.value.as_slice())];
        if let Some(tag) = &encoded.type_tag {
            writes.push((fields.module.as_str(), tag.module().as_bytes()));
            writes.push((fields.type_name.as_str(), tag.name().as_bytes()));
        }

        debug!(
            session_id = %self.id,
            attribute = name,
            type_tag = %value.type_tag(),
            bytes = encoded.value.len(),
            "Saving session attribute"
        );

        // A write can recreate an expired or invalidated hash, so the TTL
        // goes out with it
        self.store
            .hset_with_expire(&self.key, &writes, self.max_inactive_interval)
            .await
    }

    async fn list_attribute_names(&self) -> SessionResult<Vec<String>> {
        let fields = self.store.hkeys(&self.key).await?;
        Ok(fields
            .into_iter()
            .filter_map(|field| field.strip_prefix(VALUE_PREFIX).map(str::to_string))
            .collect())
    }

    async fn delete_attribute(&self, name: &str) -> SessionResult<()> {
        let fields = AttributeFields::new(name);
        self.store.hdel(&self.key, &fields.all()).await?;
        debug!(session_id = %self.id, attribute = name, "Removed session attribute");
        Ok(())
    }

    async fn destroy(&self) -> SessionResult<()> {
        self.store.delete(&self.key).await?;
        debug!(session_id = %self.id, "Session invalidated");
        Ok(())
    }

    /// Remaining time before the store expires the session.
    pub async fn time_to_live(&self) -> SessionResult<Option<Duration>> {
        self.traced(self.store.ttl(&self.key)).await
    }
}

impl fmt::Debug for RedisSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSession")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("is_new", &self.is_new)
            .field("serializer", &self.serializer.name())
            .finish()
    }
}

#[async_trait]
impl Session for RedisSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn creation_time(&self) -> f64 {
        self.traced(self.timestamp_or_fallback(CREATION_TIME)).await
    }

    async fn last_accessed_time(&self) -> f64 {
        self.traced(self.timestamp_or_fallback(LAST_ACCESSED_TIME)).await
    }

    fn is_new(&self) -> bool {
        self.is_new
    }

    fn max_inactive_interval(&self) -> Duration {
        self.max_inactive_interval
    }

    async fn is_valid(&self) -> SessionResult<bool> {
        self.traced(self.store.exists(&self.key)).await
    }

    async fn attribute_names(&self) -> SessionResult<Vec<String>> {
        self.traced(self.list_attribute_names()).await
    }

    async fn get_attribute(&self, name: &str) -> SessionResult<Option<Attribute>> {
        self.traced(self.load_attribute(name)).await
    }

    async fn set_attribute(&self, name: &str, value: Attribute) -> SessionResult<()> {
        self.traced(self.store_attribute(name, value)).await
    }

    async fn remove_attribute(&self, name: &str) -> SessionResult<()> {
        self.traced(self.delete_attribute(name)).await
    }

    async fn invalidate(&self) -> SessionResult<()> {
        self.traced(self.destroy()).await
    }
}

/// Session factory over a [`HashStore`].
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use tether_redis::RedisConfig;
/// use tether_session::{RedisSessionFactory, Session, SessionConfig, SessionExt};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = SessionConfig::redis(RedisConfig::new("localhost", 6379))
///         .with_max_inactive_interval(Duration::from_secs(3600));
///     let factory = RedisSessionFactory::new(config).await?;
///
///     let session = factory.get(None, true).await?.expect("created");
///     session.set("user_id", &123i64).await?;
///
///     let again = factory.get(Some(session.id()), false).await?.expect("exists");
///     assert_eq!(again.get::<i64>("user_id").await?, Some(123));
///
///     again.invalidate().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RedisSessionFactory {
    store: Arc<dyn HashStore>,
    serializer: Arc<dyn ObjectSerializer>,
    config: SessionConfig,
    span: Span,
}

impl RedisSessionFactory {
    /// Connect to Redis using `config.redis`.
    #[cfg(feature = "redis")]
    pub async fn new(config: SessionConfig) -> SessionResult<Self> {
        config.validate()?;
        let store = RedisHashStore::connect(config.redis.clone()).await?;
        Self::with_store(config, Arc::new(store))
    }

    /// Use a pre-built Redis service instead of connecting a new pool.
    #[cfg(feature = "redis")]
    pub fn with_redis(config: SessionConfig, redis: Arc<RedisService>) -> SessionResult<Self> {
        Self::with_store(config, Arc::new(RedisHashStore::new(redis)))
    }

    /// Use any hash store.
    ///
    /// Fails with [`SessionError::Config`] if `config` does not validate.
    pub fn with_store(config: SessionConfig, store: Arc<dyn HashStore>) -> SessionResult<Self> {
        config.validate()?;
        let span = info_span!("session_factory", key_prefix = %config.key_prefix);
        Ok(Self {
            store,
            serializer: Arc::new(JsonObjectSerializer::default()),
            config,
            span,
        })
    }

    /// Keep sessions in process memory.
    pub fn in_memory(config: SessionConfig) -> SessionResult<Self> {
        Self::with_store(config, Arc::new(MemoryHashStore::new()))
    }

    /// Replace the attribute serializer.
    pub fn with_serializer(mut self, serializer: Arc<dyn ObjectSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Run session operations inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn HashStore> {
        &self.store
    }

    /// Resolve a session.
    ///
    /// Returns `Ok(None)` when the session does not exist and `create` is
    /// false. A `None` or empty id never matches an existing session; with
    /// `create` a fresh id is generated.
    pub async fn get(
        &self,
        session_id: Option<&str>,
        create: bool,
    ) -> SessionResult<Option<RedisSession>> {
        let session_id = session_id.filter(|id| !id.is_empty());
        self.resolve(session_id, create)
            .instrument(self.span.clone())
            .await
    }

    async fn resolve(
        &self,
        session_id: Option<&str>,
        create: bool,
    ) -> SessionResult<Option<RedisSession>> {
        if !create {
            let Some(id) = session_id else {
                return Ok(None);
            };
            if !self.store.exists(&self.config.session_key(id)).await? {
                debug!(session_id = id, "Session not found");
                return Ok(None);
            }
        }
        RedisSession::open(session_id, self).await.map(Some)
    }
}

impl fmt::Debug for RedisSessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSessionFactory")
            .field("config", &self.config)
            .field("serializer", &self.serializer.name())
            .finish()
    }
}

#[async_trait]
impl SessionFactory for RedisSessionFactory {
    async fn get_session(
        &self,
        session_id: Option<&str>,
        create: bool,
    ) -> SessionResult<Option<Box<dyn Session>>> {
        let session = self.get(session_id, create).await?;
        Ok(session.map(|session| Box::new(session) as Box<dyn Session>))
    }
}
