//! Redis hash-backed HTTP sessions.
//!
//! A host web framework asks a [`SessionFactory`] for a session by id and
//! works with the returned [`Session`] through named attributes. This crate
//! implements both traits over a Redis hash per session: the hash holds the
//! creation and last-access timestamps plus one field per attribute, and
//! Redis' TTL expires idle sessions.
//!
//! # Features
//!
//! - `redis` - Redis hash store (enabled by default)
//! - `redis-tls` - TLS connections to Redis
//!
//! Without `redis` the factory still works over [`MemoryHashStore`] or any
//! other [`HashStore`].
//!
//! # Attribute serialization
//!
//! - [`JsonObjectSerializer`] (default) stores JSON in `val_<name>` and the
//!   value's [`TypeTag`] in `mod_<name>`/`clz_<name>`. Custom types must be
//!   registered in the [`AttributeRegistry`] to be read back.
//! - [`BinaryObjectSerializer`] stores a versioned binary envelope carrying
//!   its own tag in `val_<name>` alone.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use tether_redis::RedisConfig;
//! use tether_session::*;
//!
//! #[derive(Serialize, Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! impl AttributeType for User {
//!     const MODULE: &'static str = "myapp::auth";
//!     const TYPE_NAME: &'static str = "User";
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let config = SessionConfig::redis(RedisConfig::new("localhost", 6379));
//!     let registry = AttributeRegistry::with_builtins().register::<User>();
//!     let factory = RedisSessionFactory::new(config)
//!         .await?
//!         .with_serializer(Arc::new(JsonObjectSerializer::new(registry)));
//!
//!     let Some(session) = factory.get(Some("abc"), true).await? else {
//!         return Ok(());
//!     };
//!     session.set("user", &User { id: 1, name: "alice".into() }).await?;
//!     session.set_attribute("visits", Attribute::from(1i64)).await?;
//!
//!     let user: Option<User> = session.get("user").await?;
//!     println!("names: {:?}", session.attribute_names().await?);
//!
//!     // Logout
//!     session.invalidate().await?;
//!     Ok(())
//! }
//! ```

pub mod attribute;
pub mod config;
pub mod error;
pub mod memory_store;
pub mod redis_session;
pub mod serializer;
pub mod store;
pub mod traits;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use attribute::{Attribute, AttributeRegistry, AttributeType, BUILTIN_MODULE, TypeTag};
pub use config::{DEFAULT_KEY_PREFIX, DEFAULT_MAX_INACTIVE_INTERVAL, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use memory_store::{MemoryHashStore, PURGE_INTERVAL};
pub use redis_session::{RedisSession, RedisSessionFactory};
pub use serializer::{
    BINARY_FORMAT_VERSION, BinaryObjectSerializer, EncodedAttribute, JsonObjectSerializer,
    MAX_NESTING_DEPTH, ObjectSerializer,
};
pub use store::HashStore;
pub use traits::{Session, SessionExt, SessionFactory, generate_session_id};

#[cfg(feature = "redis")]
pub use redis_store::RedisHashStore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::attribute::{Attribute, AttributeRegistry, AttributeType, TypeTag};
    pub use crate::config::SessionConfig;
    pub use crate::error::{SessionError, SessionResult};
    pub use crate::redis_session::{RedisSession, RedisSessionFactory};
    pub use crate::serializer::{BinaryObjectSerializer, JsonObjectSerializer, ObjectSerializer};
    pub use crate::traits::{Session, SessionExt, SessionFactory};

    #[cfg(feature = "redis")]
    pub use crate::redis_store::RedisHashStore;
}
