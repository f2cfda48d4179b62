//! Session attribute values and their type tags.
//!
//! An [`Attribute`] is a JSON-shaped value paired with a [`TypeTag`] naming
//! the Rust type it was produced from. Types opt in to session storage by
//! implementing [`AttributeType`]; the metadata serializer only rebuilds
//! values whose tag was registered in an [`AttributeRegistry`].

use crate::error::{SessionError, SessionResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Module name used for the builtin tags.
pub const BUILTIN_MODULE: &str = "core";

/// Stable identifier of an attribute's type: a module path and a type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeTag {
    module: String,
    name: String,
}

impl TypeTag {
    /// Create a tag.
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }

    /// Create a tag in the builtin module.
    pub fn builtin(name: &str) -> Self {
        Self::new(BUILTIN_MODULE, name)
    }

    /// Builtin tag describing the kind of a JSON value.
    pub fn of_value(value: &Value) -> Self {
        let name = match value {
            Value::Null => "unit",
            Value::Bool(_) => "bool",
            Value::Number(n) if n.is_i64() => "i64",
            Value::Number(n) if n.is_u64() => "u64",
            Value::Number(_) => "f64",
            Value::String(_) => "String",
            Value::Array(_) => "Vec",
            Value::Object(_) => "Map",
        };
        Self::builtin(name)
    }

    /// Module path.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.name)
    }
}

/// A type that can be stored as a session attribute.
///
/// The constants form the type's stable tag and must not change once
/// values of the type have been written.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use tether_session::AttributeType;
///
/// #[derive(Serialize, Deserialize)]
/// struct Cart {
///     items: Vec<String>,
/// }
///
/// impl AttributeType for Cart {
///     const MODULE: &'static str = "shop";
///     const TYPE_NAME: &'static str = "Cart";
/// }
/// ```
pub trait AttributeType: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Module path half of the tag.
    const MODULE: &'static str;
    /// Type name half of the tag.
    const TYPE_NAME: &'static str;

    /// The tag written alongside values of this type.
    fn type_tag() -> TypeTag {
        TypeTag::new(Self::MODULE, Self::TYPE_NAME)
    }
}

macro_rules! builtin_attribute_types {
    ($($ty:ty => $name:literal),+ $(,)?) => {
        $(
            impl AttributeType for $ty {
                const MODULE: &'static str = BUILTIN_MODULE;
                const TYPE_NAME: &'static str = $name;
            }
        )+

        fn register_builtins(registry: &mut AttributeRegistry) {
            $( registry.insert::<$ty>(); )+
        }
    };
}

builtin_attribute_types! {
    () => "unit",
    bool => "bool",
    i32 => "i32",
    i64 => "i64",
    u32 => "u32",
    u64 => "u64",
    f64 => "f64",
    String => "String",
    Vec<Value> => "Vec",
    Map<String, Value> => "Map",
}

/// A session attribute: a value and the tag of the type it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    tag: TypeTag,
    value: Value,
}

impl Attribute {
    /// Convert a typed value, tagging it with `T`'s tag.
    pub fn new<T: AttributeType>(value: &T) -> SessionResult<Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;
        Ok(Self {
            tag: T::type_tag(),
            value,
        })
    }

    /// Wrap an untyped JSON value, tagging it by its kind.
    pub fn from_value(value: Value) -> Self {
        Self {
            tag: TypeTag::of_value(&value),
            value,
        }
    }

    pub(crate) fn from_parts(tag: TypeTag, value: Value) -> Self {
        Self { tag, value }
    }

    /// Tag of the originating type.
    pub fn type_tag(&self) -> &TypeTag {
        &self.tag
    }

    /// The JSON-shaped value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consume into the JSON-shaped value.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Rebuild a typed value.
    pub fn to_typed<T: DeserializeOwned>(&self) -> SessionResult<T> {
        T::deserialize(&self.value)
            .map_err(|e| SessionError::Deserialization(format!("{}: {}", self.tag, e)))
    }
}

impl From<Value> for Attribute {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

macro_rules! attribute_from_primitive {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for Attribute {
                fn from(value: $ty) -> Self {
                    Self::from_parts(<$ty as AttributeType>::type_tag(), Value::from(value))
                }
            }
        )+
    };
}

attribute_from_primitive!(bool, i32, i64, u32, u64, f64, String);

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

type Validator = fn(&Value) -> Result<(), serde_json::Error>;

fn validate<T: DeserializeOwned>(value: &Value) -> Result<(), serde_json::Error> {
    T::deserialize(value).map(|_| ())
}

/// Explicit registry of attribute types the metadata serializer may rebuild.
///
/// Decoding a value whose tag is absent from the registry fails rather
/// than guessing at a type.
#[derive(Clone)]
pub struct AttributeRegistry {
    validators: HashMap<TypeTag, Validator>,
}

impl AttributeRegistry {
    /// Registry with no types at all.
    pub fn empty() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    /// Registry holding the builtin primitive and JSON kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        register_builtins(&mut registry);
        registry
    }

    /// Register `T` and return the registry.
    pub fn register<T: AttributeType>(mut self) -> Self {
        self.insert::<T>();
        self
    }

    /// Register `T` in place.
    pub fn insert<T: AttributeType>(&mut self) {
        self.validators.insert(T::type_tag(), validate::<T> as Validator);
    }

    /// Whether `tag` is registered.
    pub fn contains(&self, tag: &TypeTag) -> bool {
        self.validators.contains_key(tag)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether no types are registered.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Rebuild an attribute from its tag and decoded JSON.
    ///
    /// Fails with [`SessionError::UnknownAttributeType`] for unregistered
    /// tags and [`SessionError::Deserialization`] when the JSON no longer
    /// fits the registered type.
    pub fn resolve(&self, tag: TypeTag, value: Value) -> SessionResult<Attribute> {
        let Some(validator) = self.validators.get(&tag) else {
            return Err(SessionError::UnknownAttributeType(tag));
        };
        validator(&value).map_err(|e| SessionError::Deserialization(format!("{}: {}", tag, e)))?;
        Ok(Attribute::from_parts(tag, value))
    }
}

impl Default for AttributeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for AttributeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<String> = self.validators.keys().map(ToString::to_string).collect();
        tags.sort();
        f.debug_struct("AttributeRegistry").field("types", &tags).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
    }

    impl AttributeType for Profile {
        const MODULE: &'static str = "tests";
        const TYPE_NAME: &'static str = "Profile";
    }

    #[test]
    fn test_tag_of_value_kinds() {
        assert_eq!(TypeTag::of_value(&json!(null)).name(), "unit");
        assert_eq!(TypeTag::of_value(&json!(true)).name(), "bool");
        assert_eq!(TypeTag::of_value(&json!(-3)).name(), "i64");
        assert_eq!(TypeTag::of_value(&json!(u64::MAX)).name(), "u64");
        assert_eq!(TypeTag::of_value(&json!(1.5)).name(), "f64");
        assert_eq!(TypeTag::of_value(&json!("x")).name(), "String");
        assert_eq!(TypeTag::of_value(&json!([1])).name(), "Vec");
        assert_eq!(TypeTag::of_value(&json!({"a": 1})).name(), "Map");
    }

    #[test]
    fn test_typed_attribute() {
        let profile = Profile {
            name: "alice".into(),
            age: 30,
        };
        let attribute = Attribute::new(&profile).unwrap();
        assert_eq!(attribute.type_tag(), &TypeTag::new("tests", "Profile"));
        assert_eq!(attribute.value(), &json!({"name": "alice", "age": 30}));
        assert_eq!(attribute.to_typed::<Profile>().unwrap(), profile);
    }

    #[test]
    fn test_primitive_conversions() {
        let attribute = Attribute::from(7i64);
        assert_eq!(attribute.type_tag(), &TypeTag::builtin("i64"));
        assert_eq!(attribute.to_typed::<i64>().unwrap(), 7);

        let attribute = Attribute::from("hi");
        assert_eq!(attribute.type_tag(), &TypeTag::builtin("String"));
        assert_eq!(attribute.into_value(), json!("hi"));
    }

    #[test]
    fn test_builtins_registered() {
        let registry = AttributeRegistry::with_builtins();
        for name in ["unit", "bool", "i32", "i64", "u32", "u64", "f64", "String", "Vec", "Map"] {
            assert!(registry.contains(&TypeTag::builtin(name)), "missing {}", name);
        }
        assert!(!registry.contains(&Profile::type_tag()));
    }

    #[test]
    fn test_resolve_unknown_type() {
        let registry = AttributeRegistry::with_builtins();
        let err = registry
            .resolve(Profile::type_tag(), json!({"name": "bob", "age": 1}))
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownAttributeType(tag) if tag.name() == "Profile"));
    }

    #[test]
    fn test_resolve_schema_drift() {
        let registry = AttributeRegistry::with_builtins().register::<Profile>();
        let err = registry
            .resolve(Profile::type_tag(), json!({"name": "bob"}))
            .unwrap_err();
        assert!(matches!(err, SessionError::Deserialization(_)));

        let attribute = registry
            .resolve(Profile::type_tag(), json!({"name": "bob", "age": 41}))
            .unwrap();
        assert_eq!(attribute.to_typed::<Profile>().unwrap().age, 41);
    }

    #[test]
    fn test_resolve_builtin_mismatch() {
        let registry = AttributeRegistry::default();
        assert!(registry.resolve(TypeTag::builtin("i64"), json!("nope")).is_err());
        assert!(registry.resolve(TypeTag::builtin("f64"), json!(2)).is_ok());
    }
}
