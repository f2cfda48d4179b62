//! # Tether Redis
//!
//! Redis connectivity for Tether session storage.
//!
//! ## Features
//!
//! - **Discrete connection settings**: host, port, database and ACL
//!   credentials assembled into a connection URL
//! - **Connection Pooling**: connection management with bb8
//! - **Hash commands**: binary-safe `HGET`/`HMGET`/`HSET`/`HKEYS`/`HDEL`
//!   plus key `EXISTS`/`DEL`/`EXPIRE`/`TTL`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use tether_redis::{RedisConfig, RedisService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisConfig::builder()
//!         .host("localhost")
//!         .port(6379)
//!         .database(0)
//!         .build();
//!
//!     let redis = RedisService::new(config).await?;
//!     redis
//!         .hset_with_expire("greeting", &[("text", b"hello".as_slice())], Duration::from_secs(60))
//!         .await?;
//!     let text = redis.hget("greeting", "text").await?;
//!     assert_eq!(text.as_deref(), Some(b"hello".as_slice()));
//!
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod pool;
mod service;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use pool::{RedisConnection, RedisPool, RedisPoolBuilder};
pub use service::RedisService;

// Re-export redis crate for convenience
pub use redis;

/// Prelude for common imports.
///
/// ```
/// use tether_redis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{RedisConfig, RedisConfigBuilder};
    pub use crate::error::{RedisError, Result};
    pub use crate::pool::{RedisConnection, RedisPool};
    pub use crate::service::RedisService;
}
