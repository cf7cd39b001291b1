//! The dynamically-typed value tree shared by schemas and directive results.
//!
//! [`Value`] is a tagged union over null, boolean, number, text, sequence and
//! mapping. Mappings keep insertion order, so a schema serialized back out
//! matches the order its keys arrived in.

use std::fmt;

use indexmap::IndexMap;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// An insertion-ordered mapping of text keys to values.
pub type Mapping = IndexMap<String, Value>;

/// A numeric value.
///
/// Integers that fit in `i64` are stored as [`Number::Int`]; larger unsigned
/// integers as [`Number::UInt`], so decoding never loses precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    /// A signed 64-bit integer.
    Int(i64),
    /// An unsigned integer above `i64::MAX`.
    UInt(u64),
    /// A 64-bit floating point number.
    Float(f64),
}

impl Number {
    /// Returns this number as an `f64`, possibly losing precision.
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::UInt(u) => u as f64,
            Self::Float(f) => f,
        }
    }

    /// Returns `true` if this number equals zero.
    pub fn is_zero(self) -> bool {
        match self {
            Self::Int(i) => i == 0,
            Self::UInt(u) => u == 0,
            Self::Float(f) => f == 0.0,
        }
    }
}

impl fmt::Display for Number {
    /// Canonical decimal form: `3`, `-7`, `2.5`. Floats use the shortest
    /// representation that round-trips.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}"),
            Self::Float(x) => write!(f, "{x}"),
        }
    }
}

/// Represents every schema node and every directive result.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The absence of a value.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(Number),
    /// A text string.
    Text(String),
    /// An ordered sequence of values.
    Sequence(Vec<Value>),
    /// An insertion-ordered mapping with unique keys.
    Mapping(Mapping),
}

impl Value {
    /// Creates an empty mapping value.
    pub fn mapping() -> Self {
        Self::Mapping(Mapping::new())
    }

    /// Returns the name of this value's variant, for diagnostics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Sequence(_) => "sequence",
            Self::Mapping(_) => "mapping",
        }
    }

    /// Returns `true` if this value is considered "truthy".
    ///
    /// - `Null` is falsy
    /// - Empty text, empty sequences and empty mappings are falsy
    /// - `Bool(false)` and numeric zero are falsy
    /// - Everything else is truthy
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => !n.is_zero(),
            Self::Text(s) => !s.is_empty(),
            Self::Sequence(items) => !items.is_empty(),
            Self::Mapping(map) => !map.is_empty(),
        }
    }

    /// Converts this value to output text.
    ///
    /// `Null` renders empty, booleans as `true`/`false`, numbers in canonical
    /// decimal form, and text as itself. Sequences and mappings are consumed
    /// by block directives and render empty here.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null | Self::Sequence(_) | Self::Mapping(_) => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    /// Looks up one path segment: a key on a mapping, an index on a sequence.
    pub fn get(&self, segment: &str) -> Option<&Self> {
        match self {
            Self::Mapping(map) => map.get(segment),
            Self::Sequence(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Returns the text contents if this is a `Text` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number if this is a `Number` value.
    pub const fn as_number(&self) -> Option<Number> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the mapping if this is a `Mapping` value.
    pub const fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Self::Mapping(map) => Some(map),
            _ => None,
        }
    }

    /// Returns `true` if this is a `Mapping` value.
    pub const fn is_mapping(&self) -> bool {
        matches!(self, Self::Mapping(_))
    }

    /// Serializes this value as compact JSON.
    pub fn to_json_string(&self) -> String {
        // Value serialization is infallible: every key is a string and
        // non-finite floats are written as null.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// -- Serde --

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(Number::Int(i)) => serializer.serialize_i64(*i),
            Self::Number(Number::UInt(u)) => serializer.serialize_u64(*u),
            Self::Number(Number::Float(f)) => serializer.serialize_f64(*f),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Mapping(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a null, boolean, number, string, sequence or string-keyed map")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(Number::Int(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(
            i64::try_from(v).map_or(Number::UInt(v), Number::Int),
        ))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Number(Number::Float(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Text(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::Text(v))
    }

    fn visit_bytes<E: de::Error>(self, _v: &[u8]) -> Result<Value, E> {
        Err(E::invalid_type(de::Unexpected::Other("binary blob"), &self))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::Sequence(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut map = Mapping::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            map.insert(key, value);
        }
        Ok(Value::Mapping(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

// -- From implementations --

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Number(Number::Int(i64::from(i)))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Number(Number::Int(i))
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Self::Number(i64::try_from(u).map_or(Number::UInt(u), Number::Int))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Number(Number::Float(f))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::Sequence(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(o: Option<T>) -> Self {
        o.map_or(Self::Null, Into::into)
    }
}

impl From<Mapping> for Value {
    fn from(map: Mapping) -> Self {
        Self::Mapping(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Number(Number::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Self::Number(Number::UInt(u))
                } else {
                    n.as_f64().map_or(Self::Null, |f| Self::Number(Number::Float(f)))
                }
            }
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Array(arr) => Self::Sequence(arr.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => Self::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(Number::Int(i)) => Self::from(*i),
            Value::Number(Number::UInt(u)) => Self::from(*u),
            Value::Number(Number::Float(f)) => {
                serde_json::Number::from_f64(*f).map_or(Self::Null, Self::Number)
            }
            Value::Text(s) => Self::String(s.clone()),
            Value::Sequence(items) => Self::Array(items.iter().map(Self::from).collect()),
            Value::Mapping(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_null_is_empty() {
        assert_eq!(Value::Null.to_display_string(), "");
    }

    #[test]
    fn test_display_booleans() {
        assert_eq!(Value::Bool(true).to_display_string(), "true");
        assert_eq!(Value::Bool(false).to_display_string(), "false");
    }

    #[test]
    fn test_display_numbers_canonical() {
        assert_eq!(Value::from(42).to_display_string(), "42");
        assert_eq!(Value::from(-7i64).to_display_string(), "-7");
        assert_eq!(Value::from(2.5).to_display_string(), "2.5");
        assert_eq!(Value::from(3.0).to_display_string(), "3");
        assert_eq!(Value::from(u64::MAX).to_display_string(), "18446744073709551615");
    }

    #[test]
    fn test_display_structured_is_empty() {
        assert_eq!(Value::from(vec![1, 2]).to_display_string(), "");
        assert_eq!(Value::mapping().to_display_string(), "");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::from(0.0).is_truthy());
        assert!(Value::from(-1).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(!Value::Sequence(vec![]).is_truthy());
        assert!(Value::from(vec!["a"]).is_truthy());
        assert!(!Value::mapping().is_truthy());
    }

    #[test]
    fn test_get_mapping_and_sequence() {
        let v = Value::from(serde_json::json!({"items": ["a", "b"], "name": "x"}));
        assert_eq!(v.get("name"), Some(&Value::from("x")));
        let items = v.get("items").unwrap();
        assert_eq!(items.get("1"), Some(&Value::from("b")));
        assert_eq!(items.get("5"), None);
        assert_eq!(items.get("first"), None);
        assert_eq!(Value::from(1).get("x"), None);
    }

    #[test]
    fn test_json_preserves_key_order() {
        let v: Value = serde_json::from_str(r#"{"z": 1, "a": 2, "m": 3}"#).unwrap();
        let keys: Vec<&str> = v.as_mapping().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(v.to_json_string(), r#"{"z":1,"a":2,"m":3}"#);
    }

    #[test]
    fn test_json_round_trip() {
        let text = r#"{"a":null,"b":true,"c":-3,"d":1.5,"e":"hi","f":[1,{"g":[]}],"h":18446744073709551615}"#;
        let v: Value = serde_json::from_str(text).unwrap();
        assert_eq!(v.to_json_string(), text);
        let again: Value = serde_json::from_str(&v.to_json_string()).unwrap();
        assert_eq!(again, v);
    }

    #[test]
    fn test_msgpack_round_trip() {
        let v = Value::from(serde_json::json!({
            "data": {"title": "Hello", "n": 7, "ratio": 0.25, "tags": ["x", "y"], "none": null}
        }));
        let bytes = rmp_serde::to_vec(&v).unwrap();
        let back: Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_msgpack_known_bytes() {
        // {"data": {"key": "value"}}
        let bytes = [
            129, 164, 100, 97, 116, 97, 129, 163, 107, 101, 121, 165, 118, 97, 108, 117, 101,
        ];
        let v: Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(
            v,
            Value::from(serde_json::json!({"data": {"key": "value"}}))
        );
    }

    #[test]
    fn test_msgpack_non_string_key_rejected() {
        // {1: "x"}
        let bytes = [129, 1, 161, 120];
        assert!(rmp_serde::from_slice::<Value>(&bytes).is_err());
    }

    #[test]
    fn test_json_conversion_both_ways() {
        let json = serde_json::json!({"a": [1, 2.5, "three", false, null]});
        let v = Value::from(json.clone());
        assert_eq!(serde_json::Value::from(&v), json);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Value::Null.kind(), "null");
        assert_eq!(Value::mapping().kind(), "mapping");
        assert_eq!(Value::from("x").kind(), "text");
    }
}
