//! Attribute serializers.
//!
//! Two strategies are provided:
//!
//! - [`JsonObjectSerializer`] writes the value as JSON and hands back the
//!   type tag so the session stores it in separate `mod_`/`clz_` fields.
//!   Decoding resolves the tag through an [`AttributeRegistry`].
//! - [`BinaryObjectSerializer`] writes a versioned, self-describing binary
//!   envelope holding both tag and value in one field.

use crate::attribute::{Attribute, AttributeRegistry, TypeTag};
use crate::error::{SessionError, SessionResult};
use serde::de::{self, DeserializeSeed, Deserializer, EnumAccess, SeqAccess, VariantAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;
use std::sync::Arc;

/// Deepest nesting of arrays and objects an attribute value may have.
///
/// serde_json refuses to parse anything deeper, and the binary decoder
/// stops at the same depth.
pub const MAX_NESTING_DEPTH: usize = 127;

fn nesting_error(depth: usize) -> String {
    format!("value nested {} levels deep, limit is {}", depth, MAX_NESTING_DEPTH)
}

/// Reject values nested deeper than [`MAX_NESTING_DEPTH`], without recursing.
fn check_nesting(value: &Value) -> SessionResult<()> {
    let mut pending = vec![(value, 0usize)];
    while let Some((value, depth)) = pending.pop() {
        if !(value.is_array() || value.is_object()) {
            continue;
        }
        let depth = depth + 1;
        if depth > MAX_NESTING_DEPTH {
            return Err(SessionError::Serialization(nesting_error(depth)));
        }
        match value {
            Value::Array(items) => pending.extend(items.iter().map(|child| (child, depth))),
            Value::Object(map) => pending.extend(map.values().map(|child| (child, depth))),
            _ => {}
        }
    }
    Ok(())
}

/// Bytes for the `val_` field plus, when the serializer needs it, the tag
/// for the `mod_`/`clz_` fields.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAttribute {
    /// Serialized value
    pub value: Vec<u8>,
    /// Type tag stored beside the value, if any
    pub type_tag: Option<TypeTag>,
}

/// Pluggable attribute serialization strategy.
pub trait ObjectSerializer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Encode an attribute for storage.
    fn encode(&self, attribute: &Attribute) -> SessionResult<EncodedAttribute>;

    /// Decode a stored attribute.
    fn decode(&self, encoded: EncodedAttribute) -> SessionResult<Attribute>;
}

/// JSON value with the type tag kept in separate hash fields.
#[derive(Debug, Clone, Default)]
pub struct JsonObjectSerializer {
    registry: Arc<AttributeRegistry>,
}

impl JsonObjectSerializer {
    /// Create a serializer resolving tags through `registry`.
    pub fn new(registry: AttributeRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// The registry used for decoding.
    pub fn registry(&self) -> &AttributeRegistry {
        &self.registry
    }
}

impl ObjectSerializer for JsonObjectSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, attribute: &Attribute) -> SessionResult<EncodedAttribute> {
        check_nesting(attribute.value())?;
        let value = serde_json::to_vec(attribute.value())
            .map_err(|e| SessionError::Serialization(e.to_string()))?;
        Ok(EncodedAttribute {
            value,
            type_tag: Some(attribute.type_tag().clone()),
        })
    }

    fn decode(&self, encoded: EncodedAttribute) -> SessionResult<Attribute> {
        let tag = encoded.type_tag.ok_or(SessionError::MissingTypeMetadata)?;
        let value: Value = serde_json::from_slice(&encoded.value)
            .map_err(|e| SessionError::Deserialization(e.to_string()))?;
        self.registry.resolve(tag, value)
    }
}

/// Current binary envelope version.
pub const BINARY_FORMAT_VERSION: u8 = 1;

/// Versioned binary envelope in a single field.
///
/// Layout: one version byte followed by the postcard encoding of the tag
/// and a closed tagged union of value kinds. Decoding never constructs
/// anything outside that union.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryObjectSerializer;

impl BinaryObjectSerializer {
    /// Create the serializer.
    pub fn new() -> Self {
        Self
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    tag: TypeTag,
    value: BinaryValue,
}

/// Variant order is the wire format: postcard writes the index.
#[derive(Debug, PartialEq, Serialize)]
enum BinaryValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    List(Vec<BinaryValue>),
    Map(Vec<(String, BinaryValue)>),
}

const VARIANTS: &[&str] = &["Null", "Bool", "Int", "UInt", "Float", "Str", "List", "Map"];

impl<'de> Deserialize<'de> for BinaryValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Nested { depth: 0 }.deserialize(deserializer)
    }
}

/// Decodes a [`BinaryValue`] found inside `depth` enclosing containers.
#[derive(Clone, Copy)]
struct Nested {
    depth: usize,
}

impl Nested {
    fn enter<E: de::Error>(self) -> Result<Self, E> {
        let depth = self.depth + 1;
        if depth > MAX_NESTING_DEPTH {
            return Err(E::custom(nesting_error(depth)));
        }
        Ok(Self { depth })
    }
}

impl<'de> DeserializeSeed<'de> for Nested {
    type Value = BinaryValue;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<BinaryValue, D::Error> {
        deserializer.deserialize_enum("BinaryValue", VARIANTS, self)
    }
}

impl<'de> Visitor<'de> for Nested {
    type Value = BinaryValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a binary attribute value")
    }

    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<BinaryValue, A::Error> {
        let (index, variant) = data.variant::<u32>()?;
        match index {
            0 => variant.unit_variant().map(|()| BinaryValue::Null),
            1 => variant.newtype_variant().map(BinaryValue::Bool),
            2 => variant.newtype_variant().map(BinaryValue::Int),
            3 => variant.newtype_variant().map(BinaryValue::UInt),
            4 => variant.newtype_variant().map(BinaryValue::Float),
            5 => variant.newtype_variant().map(BinaryValue::Str),
            6 => variant
                .newtype_variant_seed(Items(self.enter::<A::Error>()?))
                .map(BinaryValue::List),
            7 => variant
                .newtype_variant_seed(Entries(self.enter::<A::Error>()?))
                .map(BinaryValue::Map),
            other => Err(de::Error::invalid_value(
                de::Unexpected::Unsigned(other.into()),
                &"a variant index below 8",
            )),
        }
    }
}

// Length prefixes are untrusted
const MAX_PREALLOCATED: usize = 1024;

/// List elements at a given depth.
struct Items(Nested);

impl<'de> DeserializeSeed<'de> for Items {
    type Value = Vec<BinaryValue>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for Items {
    type Value = Vec<BinaryValue>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a list of binary attribute values")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(MAX_PREALLOCATED));
        while let Some(item) = seq.next_element_seed(self.0)? {
            items.push(item);
        }
        Ok(items)
    }
}

/// Map entries at a given depth.
struct Entries(Nested);

impl<'de> DeserializeSeed<'de> for Entries {
    type Value = Vec<(String, BinaryValue)>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for Entries {
    type Value = Vec<(String, BinaryValue)>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a list of binary attribute map entries")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(MAX_PREALLOCATED));
        while let Some(entry) = seq.next_element_seed(Entry(self.0))? {
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// One `(key, value)` map entry.
struct Entry(Nested);

impl<'de> DeserializeSeed<'de> for Entry {
    type Value = (String, BinaryValue);

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_tuple(2, self)
    }
}

impl<'de> Visitor<'de> for Entry {
    type Value = (String, BinaryValue);

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a binary attribute map entry")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let key: String = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let value = seq
            .next_element_seed(self.0)?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        Ok((key, value))
    }
}

impl From<&Value> for BinaryValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => BinaryValue::Null,
            Value::Bool(b) => BinaryValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    BinaryValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    BinaryValue::UInt(u)
                } else {
                    BinaryValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => BinaryValue::Str(s.clone()),
            Value::Array(items) => BinaryValue::List(items.iter().map(BinaryValue::from).collect()),
            Value::Object(map) => BinaryValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), BinaryValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl TryFrom<BinaryValue> for Value {
    type Error = SessionError;

    fn try_from(value: BinaryValue) -> SessionResult<Self> {
        Ok(match value {
            BinaryValue::Null => Value::Null,
            BinaryValue::Bool(b) => Value::Bool(b),
            BinaryValue::Int(i) => Value::from(i),
            BinaryValue::UInt(u) => Value::from(u),
            BinaryValue::Float(f) => Number::from_f64(f).map(Value::Number).ok_or_else(|| {
                SessionError::Deserialization(format!("non-finite float {}", f))
            })?,
            BinaryValue::Str(s) => Value::String(s),
            BinaryValue::List(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<SessionResult<Vec<_>>>()?,
            ),
            BinaryValue::Map(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (key, value) in entries {
                    map.insert(key, Value::try_from(value)?);
                }
                Value::Object(map)
            }
        })
    }
}

impl ObjectSerializer for BinaryObjectSerializer {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn encode(&self, attribute: &Attribute) -> SessionResult<EncodedAttribute> {
        check_nesting(attribute.value())?;
        let envelope = Envelope {
            tag: attribute.type_tag().clone(),
            value: BinaryValue::from(attribute.value()),
        };
        let body = postcard::to_stdvec(&envelope)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;

        let mut value = Vec::with_capacity(body.len() + 1);
        value.push(BINARY_FORMAT_VERSION);
        value.extend_from_slice(&body);

        Ok(EncodedAttribute {
            value,
            type_tag: None,
        })
    }

    fn decode(&self, encoded: EncodedAttribute) -> SessionResult<Attribute> {
        let body = match encoded.value.split_first() {
            None => return Err(SessionError::UnsupportedFormat("empty payload".to_string())),
            Some((&BINARY_FORMAT_VERSION, body)) => body,
            Some((version, _)) => {
                return Err(SessionError::UnsupportedFormat(format!(
                    "binary envelope version {}",
                    version
                )));
            }
        };

        let envelope: Envelope = postcard::from_bytes(body)
            .map_err(|e| SessionError::Deserialization(e.to_string()))?;
        let value = Value::try_from(envelope.value)?;
        Ok(Attribute::from_parts(envelope.tag, value))
    }
}
