//! Task payloads.
//!
//! `data` and `results` carry arbitrary structured values. They are modelled as
//! a closed tagged variant instead of a free-form blob so that anything which
//! cannot be persisted is visible in the type and rejected before it reaches
//! the store.

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A structured payload value.
///
/// Maps keep insertion order. `Callable` stands for a reference to in-process
/// code handed over by an embedding host; it exists so such values can be
/// named and rejected, and it never serializes.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Payload>),
    Map(Vec<(String, Payload)>),
    Callable(String),
}

impl Payload {
    /// Build a map payload from key/value pairs.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Payload)>) -> Self {
        Payload::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Null)
    }

    /// Look up a key in a map payload.
    pub fn get(&self, key: &str) -> Option<&Payload> {
        match self {
            Payload::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Payload::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Find the first value that cannot be persisted, returning a short
    /// description of its path and type.
    pub fn find_unsupported(&self) -> Option<String> {
        let mut stack: Vec<(String, &Payload)> = vec![(String::from("$"), self)];
        while let Some((path, value)) = stack.pop() {
            match value {
                Payload::Callable(name) => return Some(format!("{}: callable '{}'", path, name)),
                Payload::Float(f) if !f.is_finite() => {
                    return Some(format!("{}: non-finite number {}", path, f));
                }
                Payload::List(items) => {
                    for (i, item) in items.iter().enumerate().rev() {
                        stack.push((format!("{}[{}]", path, i), item));
                    }
                }
                Payload::Map(entries) => {
                    for (k, v) in entries.iter().rev() {
                        stack.push((format!("{}.{}", path, k), v));
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Serialize to the storage format (JSON text).
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse the storage format. Empty input reads as `Null`.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        if s.trim().is_empty() {
            return Ok(Payload::Null);
        }
        serde_json::from_str(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Payload::Int(n)
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Bool(b)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Payload::Int(i),
                None => Payload::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Payload::Text(s),
            Value::Array(items) => Payload::List(items.into_iter().map(Payload::from).collect()),
            Value::Object(map) => {
                Payload::Map(map.into_iter().map(|(k, v)| (k, Payload::from(v))).collect())
            }
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Payload::Null => serializer.serialize_unit(),
            Payload::Bool(b) => serializer.serialize_bool(*b),
            Payload::Int(n) => serializer.serialize_i64(*n),
            Payload::Float(f) => {
                if !f.is_finite() {
                    return Err(ser::Error::custom("unsupported data type: non-finite number"));
                }
                serializer.serialize_f64(*f)
            }
            Payload::Text(s) => serializer.serialize_str(s),
            Payload::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Payload::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Payload::Callable(name) => Err(ser::Error::custom(format!(
                "unsupported data type: callable '{}'",
                name
            ))),
        }
    }
}

struct PayloadVisitor;

impl<'de> Visitor<'de> for PayloadVisitor {
    type Value = Payload;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a null, boolean, number, string, list or map")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Payload, E> {
        Ok(Payload::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Payload, E> {
        Ok(Payload::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Payload, D::Error> {
        Deserialize::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Payload, E> {
        Ok(Payload::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Payload, E> {
        Ok(Payload::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Payload, E> {
        Ok(i64::try_from(v)
            .map(Payload::Int)
            .unwrap_or(Payload::Float(v as f64)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Payload, E> {
        Ok(Payload::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Payload, E> {
        Ok(Payload::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Payload, E> {
        Ok(Payload::Text(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Payload, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Payload::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Payload, A::Error> {
        let mut entries: Vec<(String, Payload)> = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, Payload>()? {
            // Later duplicates win, keeping the first position.
            if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
            } else {
                entries.push((key, value));
            }
        }
        Ok(Payload::Map(entries))
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PayloadVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_keeps_insertion_order() {
        let parsed = Payload::from_json_str(r#"{"z": 1, "a": [true, null], "m": "x"}"#).unwrap();
        let keys: Vec<&str> = match &parsed {
            Payload::Map(entries) => entries.iter().map(|(k, _)| k.as_str()).collect(),
            other => panic!("expected map, got {:?}", other),
        };
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(
            parsed.to_json_string().unwrap(),
            r#"{"z":1,"a":[true,null],"m":"x"}"#
        );
    }

    #[test]
    fn empty_storage_text_is_null() {
        assert_eq!(Payload::from_json_str("").unwrap(), Payload::Null);
        assert_eq!(Payload::from_json_str("null").unwrap(), Payload::Null);
    }

    #[test]
    fn callable_is_found_and_refuses_to_serialize() {
        let payload = Payload::map([
            ("ok", Payload::Int(1)),
            ("nested", Payload::List(vec![Payload::Callable("on_done".into())])),
        ]);
        let found = payload.find_unsupported().unwrap();
        assert!(found.contains("$.nested[0]"), "{}", found);
        assert!(payload.to_json_string().is_err());
    }

    #[test]
    fn non_finite_float_is_unsupported() {
        let payload = Payload::List(vec![Payload::Float(f64::INFINITY)]);
        assert!(payload.find_unsupported().is_some());
        assert!(Payload::Float(1.5).find_unsupported().is_none());
    }

    #[test]
    fn map_lookup() {
        let payload = Payload::map([("exit", Payload::Int(3)), ("msg", "boom".into())]);
        assert_eq!(payload.get("exit").and_then(Payload::as_i64), Some(3));
        assert_eq!(payload.get("msg").and_then(Payload::as_str), Some("boom"));
        assert!(payload.get("missing").is_none());
    }
}
