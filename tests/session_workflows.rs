//! Integration tests for common session workflows.
//!
//! Everything except the live Redis test runs against the in-memory hash
//! store, which follows the same hash and TTL semantics.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether::*;
use tracing::Subscriber;
use tracing::span;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Address {
    street: String,
    city: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Customer {
    id: u64,
    name: String,
    tags: Vec<String>,
    address: Address,
    balance: f64,
    referrer: Option<u64>,
}

impl AttributeType for Customer {
    const MODULE: &'static str = "shop::customers";
    const TYPE_NAME: &'static str = "Customer";
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn customer() -> Customer {
    Customer {
        id: 42,
        name: "Ada".to_string(),
        tags: vec!["vip".to_string(), "beta".to_string()],
        address: Address {
            street: "1 Analytical Way".to_string(),
            city: "London".to_string(),
        },
        balance: 12.5,
        referrer: None,
    }
}

fn config() -> SessionConfig {
    SessionConfig::new()
        .with_key_prefix("it:session:")
        .with_max_inactive_interval(Duration::from_secs(1800))
}

fn json_factory() -> RedisSessionFactory {
    let registry = AttributeRegistry::with_builtins().register::<Customer>();
    RedisSessionFactory::in_memory(config())
        .unwrap()
        .with_serializer(Arc::new(JsonObjectSerializer::new(registry)))
}

fn binary_factory() -> RedisSessionFactory {
    RedisSessionFactory::in_memory(config())
        .unwrap()
        .with_serializer(Arc::new(BinaryObjectSerializer))
}

// =============================================================================
// Resolution
// =============================================================================

#[tokio::test]
async fn test_fresh_session_is_new_and_empty() {
    init_tracing();
    let factory = json_factory();

    let session = factory.get(Some("fresh"), true).await.unwrap().unwrap();
    assert_eq!(session.id(), "fresh");
    assert!(session.is_new());
    assert!(session.is_valid().await.unwrap());
    assert!(session.attribute_names().await.unwrap().is_empty());
    assert_eq!(session.max_inactive_interval(), Duration::from_secs(1800));
}

#[tokio::test]
async fn test_missing_session_without_create() {
    let factory = json_factory();
    assert!(factory.get(Some("nobody"), false).await.unwrap().is_none());
    // Looking does not create
    assert!(!factory.store().exists("it:session:nobody").await.unwrap());
}

#[tokio::test]
async fn test_second_view_sees_first_views_writes() {
    let factory = json_factory();

    let first = factory.get(Some("abc"), true).await.unwrap().unwrap();
    first.set("count", &1i64).await.unwrap();

    let second = factory.get(Some("abc"), true).await.unwrap().unwrap();
    assert!(!second.is_new());
    assert_eq!(second.get::<i64>("count").await.unwrap(), Some(1));

    let created = first.try_creation_time().await.unwrap();
    assert_eq!(second.try_creation_time().await.unwrap(), created);
}

#[tokio::test]
async fn test_factory_as_trait_object() {
    let factory: Arc<dyn SessionFactory> = Arc::new(json_factory());

    let session = factory.get_session(None, true).await.unwrap().unwrap();
    session.set("user", &customer()).await.unwrap();

    let id = session.id().to_string();
    let again = factory.get_session(Some(id.as_str()), false).await.unwrap().unwrap();
    assert_eq!(again.get::<Customer>("user").await.unwrap(), Some(customer()));
}

// =============================================================================
// Attributes
// =============================================================================

async fn assert_round_trips(factory: &RedisSessionFactory) {
    let session = factory.get(Some("rt"), true).await.unwrap().unwrap();
    session.set("count", &7i64).await.unwrap();
    session.set("name", &"tether".to_string()).await.unwrap();
    session.set("customer", &customer()).await.unwrap();
    session
        .set_attribute("doc", Attribute::from(json!({"a": [1, {"b": null}], "c": 1.5})))
        .await
        .unwrap();

    // Same view
    assert_eq!(session.get::<i64>("count").await.unwrap(), Some(7));
    assert_eq!(
        session.get::<String>("name").await.unwrap(),
        Some("tether".to_string())
    );

    // Re-resolved view
    let again = factory.get(Some("rt"), false).await.unwrap().unwrap();
    assert_eq!(again.get::<Customer>("customer").await.unwrap(), Some(customer()));

    let doc = again.get_attribute("doc").await.unwrap().unwrap();
    assert_eq!(doc.value(), &json!({"a": [1, {"b": null}], "c": 1.5}));
    assert_eq!(doc.type_tag(), &TypeTag::builtin("Map"));

    let customer_attr = again.get_attribute("customer").await.unwrap().unwrap();
    assert_eq!(
        customer_attr.type_tag(),
        &TypeTag::new("shop::customers", "Customer")
    );

    let mut names = again.attribute_names().await.unwrap();
    names.sort();
    assert_eq!(names, vec!["count", "customer", "doc", "name"]);
}

#[tokio::test]
async fn test_round_trip_with_metadata_serializer() {
    assert_round_trips(&json_factory()).await;
}

#[tokio::test]
async fn test_round_trip_with_binary_serializer() {
    assert_round_trips(&binary_factory()).await;
}

#[tokio::test]
async fn test_unset_attribute_is_none() {
    for factory in [json_factory(), binary_factory()] {
        let session = factory.get(Some("unset"), true).await.unwrap().unwrap();
        assert!(session.get_attribute("missing").await.unwrap().is_none());
        assert_eq!(session.get::<i64>("missing").await.unwrap(), None);
    }
}

#[tokio::test]
async fn test_overwrite_replaces_value_and_type() {
    let factory = json_factory();
    let session = factory.get(Some("over"), true).await.unwrap().unwrap();

    session.set("v", &1i64).await.unwrap();
    session.set("v", &"one".to_string()).await.unwrap();

    let attr = session.get_attribute("v").await.unwrap().unwrap();
    assert_eq!(attr.type_tag(), &TypeTag::builtin("String"));
    assert_eq!(attr.value(), &json!("one"));
}

#[tokio::test]
async fn test_unregistered_type_is_rejected_on_read() {
    // Writer knows the type, reader does not
    let store: Arc<dyn HashStore> = Arc::new(MemoryHashStore::new());
    let writer = RedisSessionFactory::with_store(config(), Arc::clone(&store))
        .unwrap()
        .with_serializer(Arc::new(JsonObjectSerializer::new(
            AttributeRegistry::with_builtins().register::<Customer>(),
        )));
    let reader = RedisSessionFactory::with_store(config(), store).unwrap();

    let session = writer.get(Some("shared"), true).await.unwrap().unwrap();
    session.set("customer", &customer()).await.unwrap();

    let view = reader.get(Some("shared"), false).await.unwrap().unwrap();
    let err = view.get_attribute("customer").await.unwrap_err();
    assert!(matches!(err, SessionError::UnknownAttributeType(tag) if tag.name() == "Customer"));
}

#[tokio::test]
async fn test_serializers_do_not_read_each_other() {
    let store: Arc<dyn HashStore> = Arc::new(MemoryHashStore::new());
    let json = RedisSessionFactory::with_store(config(), Arc::clone(&store)).unwrap();
    let binary = RedisSessionFactory::with_store(config(), store)
        .unwrap()
        .with_serializer(Arc::new(BinaryObjectSerializer));

    let session = binary.get(Some("mixed"), true).await.unwrap().unwrap();
    session.set("n", &5i64).await.unwrap();

    let view = json.get(Some("mixed"), false).await.unwrap().unwrap();
    let err = view.get_attribute("n").await.unwrap_err();
    assert!(matches!(err, SessionError::MissingTypeMetadata));
}

// =============================================================================
// Invalidation and expiry
// =============================================================================

#[tokio::test]
async fn test_invalidate() {
    let factory = json_factory();
    let session = factory.get(Some("bye"), true).await.unwrap().unwrap();
    session.set("count", &1i64).await.unwrap();

    session.invalidate().await.unwrap();

    assert!(!session.is_valid().await.unwrap());
    assert!(session.get_attribute("count").await.unwrap().is_none());
    assert!(session.attribute_names().await.unwrap().is_empty());
    assert!(factory.get(Some("bye"), false).await.unwrap().is_none());

    // Still usable, falls back to the opening time
    assert_eq!(session.creation_time().await, session.opened_at());
}

#[tokio::test(start_paused = true)]
async fn test_materialization_resets_ttl() {
    let factory = json_factory();
    let first = factory.get(Some("ttl"), true).await.unwrap().unwrap();
    assert_eq!(
        first.time_to_live().await.unwrap(),
        Some(Duration::from_secs(1800))
    );

    tokio::time::advance(Duration::from_secs(1000)).await;
    assert_eq!(
        first.time_to_live().await.unwrap(),
        Some(Duration::from_secs(800))
    );

    let second = factory.get(Some("ttl"), false).await.unwrap().unwrap();
    assert_eq!(
        second.time_to_live().await.unwrap(),
        Some(Duration::from_secs(1800))
    );
    assert_eq!(second.last_accessed_time().await, second.opened_at());
}

#[tokio::test]
async fn test_reopening_advances_last_access() {
    let factory = json_factory();
    let first = factory.get(Some("clock"), true).await.unwrap().unwrap();
    let first_access = first.try_last_accessed_time().await.unwrap().unwrap();

    // Timestamps are wall clock with sub-millisecond resolution
    std::thread::sleep(Duration::from_millis(5));

    let second = factory.get(Some("clock"), false).await.unwrap().unwrap();
    let second_access = second.try_last_accessed_time().await.unwrap().unwrap();
    assert!(second_access > first_access);
    assert_eq!(second.try_creation_time().await.unwrap(), Some(first_access));
    // The earlier view now reads the newer stamp
    assert_eq!(first.last_accessed_time().await, second_access);
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_expires() {
    let factory = json_factory();
    let session = factory.get(Some("idle"), true).await.unwrap().unwrap();
    session.set("count", &1i64).await.unwrap();

    tokio::time::advance(Duration::from_secs(1801)).await;

    assert!(!session.is_valid().await.unwrap());
    assert!(factory.get(Some("idle"), false).await.unwrap().is_none());

    let reborn = factory.get(Some("idle"), true).await.unwrap().unwrap();
    assert!(reborn.is_new());
    assert!(reborn.get_attribute("count").await.unwrap().is_none());
}

/// Records the name of every span entered.
#[derive(Clone, Default)]
struct EnteredSpans(Arc<Mutex<Vec<&'static str>>>);

impl EnteredSpans {
    fn count(&self, name: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|entered| **entered == name).count()
    }
}

impl<S> Layer<S> for EnteredSpans
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_enter(&self, id: &span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            self.0.lock().unwrap().push(span.name());
        }
    }
}

#[tokio::test]
async fn test_every_session_operation_runs_in_factory_span() {
    let entered = EnteredSpans::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(entered.clone()));

    let factory = json_factory();
    let session = factory.get(Some("spans"), true).await.unwrap().unwrap();
    session.set("a", &1i64).await.unwrap();

    let mut seen = entered.count("session_factory");
    assert!(seen > 0);
    let mut assert_entered = |what: &str| {
        let now = entered.count("session_factory");
        assert!(now > seen, "{} ran outside the factory span", what);
        seen = now;
    };

    session.is_valid().await.unwrap();
    assert_entered("is_valid");
    session.attribute_names().await.unwrap();
    assert_entered("attribute_names");
    session.get_attribute("a").await.unwrap();
    assert_entered("get_attribute");
    session.remove_attribute("a").await.unwrap();
    assert_entered("remove_attribute");
    session.creation_time().await;
    assert_entered("creation_time");
    session.try_last_accessed_time().await.unwrap();
    assert_entered("try_last_accessed_time");
    session.time_to_live().await.unwrap();
    assert_entered("time_to_live");
    session.invalidate().await.unwrap();
    assert_entered("invalidate");
}

#[tokio::test]
async fn test_custom_span_is_accepted() {
    init_tracing();
    let span = tracing::info_span!("request", path = "/cart");
    let factory = json_factory().with_span(span);
    let session = factory.get(None, true).await.unwrap().unwrap();
    session.set("items", &3u32).await.unwrap();
    assert_eq!(session.get::<u32>("items").await.unwrap(), Some(3));
}

// =============================================================================
// Live Redis
// =============================================================================

#[cfg(feature = "redis")]
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_session_lifecycle() {
    init_tracing();
    let config = SessionConfig::redis(RedisConfig::from_env().build())
        .with_key_prefix("tether:it:")
        .with_max_inactive_interval(Duration::from_secs(60));
    let factory = RedisSessionFactory::new(config).await.unwrap();

    let session = factory.get(None, true).await.unwrap().unwrap();
    assert!(session.is_new());
    session.set("count", &1i64).await.unwrap();

    let again = factory.get(Some(session.id()), false).await.unwrap().unwrap();
    assert!(!again.is_new());
    assert_eq!(again.get::<i64>("count").await.unwrap(), Some(1));

    let ttl = again.time_to_live().await.unwrap().unwrap();
    assert!(ttl <= Duration::from_secs(60));

    again.invalidate().await.unwrap();
    assert!(!session.is_valid().await.unwrap());
}
