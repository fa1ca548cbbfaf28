//! Helpers for working with dynamic record values.
//!
//! Record values are [`serde_json::Value`]s. The rules need a handful of
//! loosely-typed operations on them: emptiness, structural equality that treats
//! `1` and `1.0` alike, a display form for messages and lookups, and the size
//! metric used by the sized and ranged rules.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;

/// Runtime type tag used to pick a size-rule message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    String,
    Number,
    /// Arrays and objects.
    Object,
}

impl TypeTag {
    /// Type tag of a value; `None` for null and booleans.
    pub fn of(value: &Value) -> Option<TypeTag> {
        match value {
            Value::String(_) => Some(TypeTag::String),
            Value::Number(_) => Some(TypeTag::Number),
            Value::Array(_) | Value::Object(_) => Some(TypeTag::Object),
            Value::Null | Value::Bool(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TypeTag::String => "string",
            TypeTag::Number => "number",
            TypeTag::Object => "object",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size metric: character count, numeric magnitude, or item count.
pub fn size_of(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Number(n) => n.as_f64(),
        Value::Array(items) => Some(items.len() as f64),
        Value::Object(map) => Some(map.len() as f64),
        Value::Null | Value::Bool(_) => None,
    }
}

/// Whether a value counts as "not provided".
///
/// Null, zero, and empty strings, arrays, and objects are empty.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(_) => false,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Deep structural equality where numbers compare by numeric value.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Whether the value is a scalar (not an array or object).
pub fn is_primitive(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Text form of a value, used for messages and for keyed lookups.
///
/// Strings are unquoted, whole numbers print without a fraction, null prints
/// as `null`, and composite values print as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => display_number(n),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn display_number(n: &Number) -> String {
    if n.is_f64() {
        match n.as_f64() {
            Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            Some(f) => f.to_string(),
            None => n.to_string(),
        }
    } else {
        n.to_string()
    }
}

/// Build a number value, preferring an integer representation.
pub fn number(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Leading-number parse of a value: numbers pass through, strings are parsed
/// after trimming. Anything else yields `None`.
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}
