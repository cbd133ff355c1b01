//! Totally ordered key domain for index bounds and index entries.
//!
//! Every JSON value maps into a `KeyValue` with a deterministic total order,
//! bracketed by the `MinKey` / `MaxKey` sentinels used to pad composite index
//! bounds. Cross-type ordering is fixed:
//!
//! MinKey < Null < Number < String < Object < Array < Bool < MaxKey
//!
//! Numbers compare numerically regardless of integer/float representation.

use std::fmt;

use serde_json::Value;

/// A floating point number with a total order.
///
/// Stored as sign-flipped bits so that the natural `u64` ordering matches
/// numeric ordering: negative floats have all bits flipped, positive floats
/// have the sign bit flipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyNumber(u64);

impl KeyNumber {
    /// Create a key number from an `f64`.
    pub fn from_f64(v: f64) -> Self {
        let bits = v.to_bits();
        let ordered = if (bits >> 63) == 1 {
            !bits
        } else {
            bits ^ (1 << 63)
        };
        KeyNumber(ordered)
    }

    /// Create a key number from an `i64`.
    ///
    /// Integers above 2^53 lose precision; the planner only compares keys,
    /// it never does arithmetic on them.
    pub fn from_i64(v: i64) -> Self {
        Self::from_f64(v as f64)
    }

    /// Recover the numeric value.
    pub fn as_f64(&self) -> f64 {
        let bits = if (self.0 >> 63) == 1 {
            self.0 ^ (1 << 63)
        } else {
            !self.0
        };
        f64::from_bits(bits)
    }
}

impl fmt::Display for KeyNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_f64())
    }
}

/// A single value in the ordered key domain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    /// Sorts before every other value
    MinKey,
    /// JSON null
    Null,
    /// Numeric value (integer or float, compared numerically)
    Number(KeyNumber),
    /// String value
    String(String),
    /// Object value (field name / value pairs in document order)
    Object(Vec<(String, KeyValue)>),
    /// Array value
    Array(Vec<KeyValue>),
    /// Boolean value (false < true)
    Bool(bool),
    /// Sorts after every other value
    MaxKey,
}

impl KeyValue {
    /// Create a key from an integer.
    pub fn int(v: i64) -> Self {
        KeyValue::Number(KeyNumber::from_i64(v))
    }

    /// Create a key from a float.
    pub fn float(v: f64) -> Self {
        KeyValue::Number(KeyNumber::from_f64(v))
    }

    /// Create a key from a string.
    pub fn string(v: impl Into<String>) -> Self {
        KeyValue::String(v.into())
    }

    /// Convert a JSON value into the key domain.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => KeyValue::Null,
            Value::Bool(b) => KeyValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    KeyValue::int(i)
                } else {
                    KeyValue::float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => KeyValue::String(s.clone()),
            Value::Array(items) => KeyValue::Array(items.iter().map(KeyValue::from_json).collect()),
            Value::Object(map) => KeyValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), KeyValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render the key back as JSON for diagnostics.
    ///
    /// Sentinels render as the strings `"$minKey"` / `"$maxKey"`.
    pub fn to_json(&self) -> Value {
        match self {
            KeyValue::MinKey => Value::String("$minKey".to_string()),
            KeyValue::MaxKey => Value::String("$maxKey".to_string()),
            KeyValue::Null => Value::Null,
            KeyValue::Bool(b) => Value::Bool(*b),
            KeyValue::Number(n) => {
                let v = n.as_f64();
                if v.fract() == 0.0 && v.abs() < 9e15 {
                    Value::from(v as i64)
                } else {
                    Value::from(v)
                }
            }
            KeyValue::String(s) => Value::String(s.clone()),
            KeyValue::Array(items) => Value::Array(items.iter().map(KeyValue::to_json).collect()),
            KeyValue::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json());
                }
                Value::Object(map)
            }
        }
    }

}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::MinKey => write!(f, "$minKey"),
            KeyValue::MaxKey => write!(f, "$maxKey"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// A composite key: one `KeyValue` per index key field, compared
/// lexicographically. Used both as index entry key and as scan bound.
pub type CompositeKey = Vec<KeyValue>;

/// Smallest string strictly greater than every string with the given prefix,
/// or `None` when no such string exists (prefix is all `char::MAX`).
///
/// Used to bound prefix-anchored regex clauses: `^abc` scans `["abc", "abd")`.
pub fn string_prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(bumped) = char::from_u32(last as u32 + 1) {
            chars.push(bumped);
            return Some(chars.into_iter().collect());
        }
        // Last char has no successor, drop it and bump the previous one.
    }
    None
}
