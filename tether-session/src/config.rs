//! Session configuration.

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(feature = "redis")]
use tether_redis::RedisConfig;

/// Default prefix for session hash keys.
pub const DEFAULT_KEY_PREFIX: &str = "tether:session:";

/// Default inactivity interval after which Redis expires a session.
pub const DEFAULT_MAX_INACTIVE_INTERVAL: Duration = Duration::from_secs(1800);

/// Session configuration.
///
/// Passed explicitly to the factory; nothing is read from process-wide
/// state after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Prefix prepended to the session id to form the hash key
    pub key_prefix: String,
    /// TTL applied to the session hash on every materialization
    #[serde(with = "duration_secs")]
    pub max_inactive_interval: Duration,
    /// Redis connection settings
    #[cfg(feature = "redis")]
    pub redis: RedisConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_inactive_interval: DEFAULT_MAX_INACTIVE_INTERVAL,
            #[cfg(feature = "redis")]
            redis: RedisConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default prefix and interval.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration for the given Redis connection.
    ///
    /// # Examples
    ///
    /// ```
    /// use tether_session::SessionConfig;
    /// use tether_redis::RedisConfig;
    ///
    /// let config = SessionConfig::redis(RedisConfig::new("localhost", 6379))
    ///     .with_key_prefix("myapp:session:");
    /// assert_eq!(config.session_key("abc"), "myapp:session:abc");
    /// ```
    #[cfg(feature = "redis")]
    pub fn redis(redis: RedisConfig) -> Self {
        Self {
            redis,
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Reads `SESSION_KEY_PREFIX` and `SESSION_MAX_INACTIVE_SECS`, plus the
    /// `REDIS_*` variables understood by [`RedisConfig::from_env`].
    pub fn from_env() -> SessionResult<Self> {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("SESSION_KEY_PREFIX") {
            config.key_prefix = prefix;
        }

        if let Ok(secs) = std::env::var("SESSION_MAX_INACTIVE_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                SessionError::Config(format!("SESSION_MAX_INACTIVE_SECS is not a number: {}", secs))
            })?;
            config.max_inactive_interval = Duration::from_secs(secs);
        }

        #[cfg(feature = "redis")]
        {
            config.redis = RedisConfig::from_env().build();
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the session key prefix.
    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    /// Set the inactivity interval.
    pub fn with_max_inactive_interval(mut self, interval: Duration) -> Self {
        self.max_inactive_interval = interval;
        self
    }

    /// Check the configuration for values Redis cannot honour.
    ///
    /// `EXPIRE` takes a whole, positive, signed 64-bit number of seconds.
    pub fn validate(&self) -> SessionResult<()> {
        let secs = self.max_inactive_interval.as_secs();
        if secs == 0 {
            return Err(SessionError::Config(
                "max_inactive_interval must be at least one second".to_string(),
            ));
        }
        if i64::try_from(secs).is_err() {
            return Err(SessionError::Config(format!(
                "max_inactive_interval of {}s exceeds the Redis TTL range",
                secs
            )));
        }
        Ok(())
    }

    /// Build the hash key for a session id.
    pub fn session_key(&self, session_id: &str) -> String {
        format!("{}{}", self.key_prefix, session_id)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
