//! Session and session factory traits.
//!
//! These are the capability interfaces a host framework programs against;
//! any implementation can be swapped in for another.

use crate::attribute::{Attribute, AttributeType};
use crate::error::SessionResult;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// A server-side session.
///
/// Every method that touches state is a round trip to the backing store;
/// implementations do not cache field values between calls.
#[async_trait]
pub trait Session: Send + Sync {
    /// The session identifier.
    fn id(&self) -> &str;

    /// Creation time in seconds since the Unix epoch.
    ///
    /// Falls back to the time this handle was opened if the stored value
    /// cannot be read.
    async fn creation_time(&self) -> f64;

    /// Last access time in seconds since the Unix epoch.
    ///
    /// Same fallback as [`creation_time`](Self::creation_time).
    async fn last_accessed_time(&self) -> f64;

    /// Whether opening this handle created the session.
    fn is_new(&self) -> bool;

    /// Inactivity interval after which the session expires.
    fn max_inactive_interval(&self) -> Duration;

    /// Whether the session still exists in the store.
    async fn is_valid(&self) -> SessionResult<bool>;

    /// Names of all stored attributes, in no particular order.
    async fn attribute_names(&self) -> SessionResult<Vec<String>>;

    /// Get an attribute.
    ///
    /// Returns `Ok(None)` if the attribute was never set or the session is
    /// gone.
    async fn get_attribute(&self, name: &str) -> SessionResult<Option<Attribute>>;

    /// Set an attribute.
    async fn set_attribute(&self, name: &str, value: Attribute) -> SessionResult<()>;

    /// Remove an attribute. Removing a missing attribute is a no-op.
    async fn remove_attribute(&self, name: &str) -> SessionResult<()>;

    /// Destroy the session. Invalidating a missing session is a no-op.
    async fn invalidate(&self) -> SessionResult<()>;
}

/// Resolves session identifiers to sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Get a session by ID.
    ///
    /// # Arguments
    ///
    /// * `session_id` - The session ID; `None` or empty asks for a new one
    /// * `create` - Create the session if it does not exist
    ///
    /// # Returns
    ///
    /// Returns `Ok(None)` if the session does not exist and `create` is
    /// false.
    async fn get_session(
        &self,
        session_id: Option<&str>,
        create: bool,
    ) -> SessionResult<Option<Box<dyn Session>>>;
}

/// Typed convenience methods available on every [`Session`].
///
/// ```ignore
/// use tether_session::{Session, SessionExt};
///
/// async fn bump(session: &dyn Session) -> tether_session::SessionResult<i64> {
///     let count: i64 = session.get("count").await?.unwrap_or(0) + 1;
///     session.set("count", &count).await?;
///     Ok(count)
/// }
/// ```
#[async_trait]
pub trait SessionExt: Session {
    /// Get an attribute converted to `T`.
    async fn get<T: for<'de> Deserialize<'de>>(&self, name: &str) -> SessionResult<Option<T>> {
        match self.get_attribute(name).await? {
            Some(attribute) => attribute.to_typed().map(Some),
            None => Ok(None),
        }
    }

    /// Set an attribute from a typed value, tagged with `T`'s tag.
    async fn set<T: AttributeType>(&self, name: &str, value: &T) -> SessionResult<()> {
        let attribute = Attribute::new(value)?;
        self.set_attribute(name, attribute).await
    }
}

impl<S: Session + ?Sized> SessionExt for S {}

/// Generate a new unique session ID.
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
