// Tether - Redis hash-backed HTTP sessions
//
// This library gives a web framework a session factory and session views
// whose state lives in Redis hashes, with attribute values encoded by a
// pluggable object serializer.

// Re-export session functionality
pub use tether_session::*;

// Re-export the Redis layer
#[cfg(feature = "redis")]
pub use tether_redis;

#[cfg(feature = "redis")]
pub use tether_redis::{RedisConfig, RedisConfigBuilder, RedisError, RedisService};

// Prelude for common imports
pub mod prelude {
    pub use tether_session::prelude::*;

    #[cfg(feature = "redis")]
    pub use tether_redis::RedisConfig;
}
