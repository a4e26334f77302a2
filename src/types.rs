use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::SqlWorkerError;

/// Largest integer a 64-bit float represents exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Values that cross the engine boundary, as bind parameters, row cells or callback
/// arguments/results.
///
/// ```rust
/// use sql_worker::prelude::*;
///
/// let params = vec![
///     Value::Integer(1),
///     Value::Text("alice".into()),
///     Value::Blob(vec![0xde, 0xad]),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,
    /// Integer value (64-bit)
    Integer(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Binary data
    Blob(Vec<u8>),
}

impl Value {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let Value::Integer(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    /// Numeric view; integers are widened to `f64`.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            Value::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let Value::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Build a text value from UTF-16 code units.
    ///
    /// Lone or reversed surrogates are replaced by U+FFFD one unit at a time, so a malformed
    /// surrogate never swallows the characters that follow it.
    #[must_use]
    pub fn from_utf16(units: &[u16]) -> Self {
        Value::Text(crate::engine::memory::transcode_utf16(units))
    }

    /// Convert a host JSON value into the closed value union.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::BindError` for objects, nested arrays, and arrays that are not
    /// made of byte-sized integers.
    pub fn from_json(value: &JsonValue) -> Result<Self, SqlWorkerError> {
        match value {
            JsonValue::Null => Ok(Value::Null),
            JsonValue::Bool(b) => Ok(Value::Integer(i64::from(*b))),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(unsupported(value))
                }
            }
            JsonValue::String(s) => Ok(Value::Text(s.clone())),
            JsonValue::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| unsupported(value))
                })
                .collect::<Result<Vec<u8>, _>>()
                .map(Value::Blob),
            JsonValue::Object(_) => Err(unsupported(value)),
        }
    }
}

fn unsupported(value: &JsonValue) -> SqlWorkerError {
    SqlWorkerError::BindError(format!(
        "Wrong API use : tried to bind a value of an unknown type ({value})."
    ))
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Blob(bytes) => {
                let mut seq = serializer.serialize_seq(Some(bytes.len()))?;
                for byte in bytes {
                    seq.serialize_element(byte)?;
                }
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("null, a number, a string, a boolean or an array of bytes")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_none<E: de::Error>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
                Ok(Value::Integer(i64::from(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
                Ok(Value::Integer(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
                i64::try_from(v)
                    .map(Value::Integer)
                    .map_err(|_| E::custom(format!("integer {v} out of range")))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
                Ok(Value::Float(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
                Ok(Value::Text(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
                Ok(Value::Text(v))
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
                Ok(Value::Blob(v.to_vec()))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(byte) = seq.next_element::<u8>()? {
                    bytes.push(byte);
                }
                Ok(Value::Blob(bytes))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Parameters bound to a statement, either by position or by name.
///
/// Named parameters are looked up with the engine's parameter-index lookup, so the name must
/// include its prefix (`:x`, `@x`, `$x`). Names the statement does not declare are skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    /// Bound to indexes 1, 2, 3, ... in order.
    Positional(Vec<Value>),
    /// Bound by name, in the given order.
    Named(Vec<(String, Value)>),
}

impl Params {
    #[must_use]
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Params::Positional(values.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Params::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Convert a host JSON parameter container: arrays are positional, objects are named,
    /// `null` means no parameters.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::BindError` if the container or any value in it is not
    /// representable as a [`Value`].
    pub fn from_json(params: &JsonValue) -> Result<Option<Self>, SqlWorkerError> {
        match params {
            JsonValue::Null => Ok(None),
            JsonValue::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(|values| Some(Params::Positional(values))),
            JsonValue::Object(map) => map
                .iter()
                .map(|(name, value)| Value::from_json(value).map(|v| (name.clone(), v)))
                .collect::<Result<Vec<_>, _>>()
                .map(|pairs| Some(Params::Named(pairs))),
            other => Err(SqlWorkerError::BindError(format!(
                "parameters must be an array or an object, got {other}"
            ))),
        }
    }
}

/// Per-request decode configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Decode integers exactly even beyond the 53-bit range a double can hold.
    #[serde(rename = "useBigInt", default)]
    pub use_big_int: bool,
}

impl QueryConfig {
    #[must_use]
    pub fn big_int() -> Self {
        Self { use_big_int: true }
    }
}

/// Outcome of advancing a statement cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    RowAvailable,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_scalars_map_onto_the_union() {
        assert_eq!(Value::from_json(&json!(null)).unwrap(), Value::Null);
        assert_eq!(Value::from_json(&json!(true)).unwrap(), Value::Integer(1));
        assert_eq!(Value::from_json(&json!(7)).unwrap(), Value::Integer(7));
        assert_eq!(Value::from_json(&json!(1.5)).unwrap(), Value::Float(1.5));
        assert_eq!(
            Value::from_json(&json!("x")).unwrap(),
            Value::Text("x".into())
        );
        assert_eq!(
            Value::from_json(&json!([1, 2, 255])).unwrap(),
            Value::Blob(vec![1, 2, 255])
        );
    }

    #[test]
    fn objects_and_wide_arrays_are_bind_errors() {
        assert!(matches!(
            Value::from_json(&json!({"a": 1})),
            Err(SqlWorkerError::BindError(_))
        ));
        assert!(matches!(
            Value::from_json(&json!([1, 256])),
            Err(SqlWorkerError::BindError(_))
        ));
        assert!(matches!(
            Params::from_json(&json!("nope")),
            Err(SqlWorkerError::BindError(_))
        ));
    }

    #[test]
    fn params_shape_follows_json_container() {
        assert_eq!(Params::from_json(&json!(null)).unwrap(), None);
        assert_eq!(
            Params::from_json(&json!([1, "a"])).unwrap(),
            Some(Params::positional([Value::Integer(1), Value::from("a")]))
        );
        assert_eq!(
            Params::from_json(&json!({":x": 5})).unwrap(),
            Some(Params::named([(":x", 5_i64)]))
        );
    }

    #[test]
    fn values_serialize_as_plain_json() {
        let row = vec![
            Value::Null,
            Value::Integer(1),
            Value::Float(0.5),
            Value::from("x"),
            Value::Blob(vec![1, 2]),
        ];
        assert_eq!(
            serde_json::to_value(&row).unwrap(),
            json!([null, 1, 0.5, "x", [1, 2]])
        );
    }

    #[test]
    fn query_config_reads_wire_name() {
        let cfg: QueryConfig = serde_json::from_value(json!({"useBigInt": true})).unwrap();
        assert!(cfg.use_big_int);
        let cfg: QueryConfig = serde_json::from_value(json!({})).unwrap();
        assert!(!cfg.use_big_int);
    }

    #[test]
    fn lone_surrogate_does_not_eat_neighbours() {
        let units = [0x0061, 0xD800, 0x0062, 0xD83D, 0xDE00];
        assert_eq!(
            Value::from_utf16(&units),
            Value::Text("a\u{FFFD}b\u{1F600}".into())
        );
    }
}
