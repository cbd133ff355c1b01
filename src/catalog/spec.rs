//! Index descriptors.

use std::fmt;

use serde_json::Value;

use crate::query::SortDirection;

use super::errors::{CatalogError, CatalogResult};

/// Description of one index on a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Unique index name within the collection
    pub name: String,
    /// Ordered key pattern: field names with directions
    pub key: Vec<(String, SortDirection)>,
    /// Sparse indexes omit documents lacking the indexed field
    pub sparse: bool,
    /// Set once any indexed document carries an array value on a key field
    pub multikey: bool,
    /// Non-btree access kind (e.g. "2d"); None for plain btree indexes
    pub special: Option<String>,
}

impl IndexSpec {
    /// The distinguished `_id` index every collection carries.
    pub fn id_index() -> Self {
        Self {
            name: "_id_".to_string(),
            key: vec![("_id".to_string(), SortDirection::Asc)],
            sparse: false,
            multikey: false,
            special: None,
        }
    }

    /// Parse a `{field: ±1 | "kind", ...}` key pattern document.
    pub fn from_key_pattern(key_pattern: &Value) -> CatalogResult<Self> {
        let map = key_pattern
            .as_object()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| {
                CatalogError::InvalidKeyPattern("key pattern must be a non-empty document".into())
            })?;
        let mut key = Vec::with_capacity(map.len());
        let mut special = None;
        for (field, value) in map {
            match value {
                Value::Number(n) => {
                    let dir = n
                        .as_i64()
                        .and_then(SortDirection::from_i32)
                        .ok_or_else(|| {
                            CatalogError::InvalidKeyPattern(format!(
                                "direction for '{}' must be 1 or -1",
                                field
                            ))
                        })?;
                    key.push((field.clone(), dir));
                }
                Value::String(kind) => {
                    if special.is_some() {
                        return Err(CatalogError::InvalidKeyPattern(
                            "at most one special field per index".into(),
                        ));
                    }
                    special = Some(kind.clone());
                    key.push((field.clone(), SortDirection::Asc));
                }
                _ => {
                    return Err(CatalogError::InvalidKeyPattern(format!(
                        "value for '{}' must be a direction or a kind string",
                        field
                    )))
                }
            }
        }
        let mut spec = Self {
            name: String::new(),
            key,
            sparse: false,
            multikey: false,
            special,
        };
        spec.name = spec.default_name();
        Ok(spec)
    }

    /// Builder: set the index name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder: mark sparse.
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Conventional name derived from the key pattern, e.g. `a_1_b_-1`.
    pub fn default_name(&self) -> String {
        let mut parts = Vec::with_capacity(self.key.len());
        for (i, (field, dir)) in self.key.iter().enumerate() {
            if self.special.is_some() && i == 0 {
                parts.push(format!("{}_{}", field, self.special.as_deref().unwrap_or("")));
            } else {
                parts.push(format!("{}_{}", field, dir.as_i32()));
            }
        }
        parts.join("_")
    }

    /// True for the distinguished `_id` index.
    pub fn is_id(&self) -> bool {
        self.special.is_none()
            && self.key.len() == 1
            && self.key[0].0 == "_id"
            && self.key[0].1 == SortDirection::Asc
    }

    /// Number of key fields.
    pub fn arity(&self) -> usize {
        self.key.len()
    }

    /// Key field names in pattern order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.key.iter().map(|(f, _)| f.as_str())
    }

    /// True when every given field is part of the key pattern.
    pub fn covers_fields<'a>(&self, mut fields: impl Iterator<Item = &'a str>) -> bool {
        fields.all(|f| self.key.iter().any(|(k, _)| k == f))
    }

    /// The key pattern rendered back as JSON, e.g. `{"a": 1, "b": -1}` or
    /// `{"a": "2d"}`.
    pub fn key_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (i, (field, dir)) in self.key.iter().enumerate() {
            if i == 0 {
                if let Some(kind) = &self.special {
                    map.insert(field.clone(), Value::String(kind.clone()));
                    continue;
                }
            }
            map.insert(field.clone(), Value::from(dir.as_i32()));
        }
        Value::Object(map)
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.key_json())?;
        if self.sparse {
            write!(f, " sparse")?;
        }
        if self.multikey {
            write!(f, " multikey")?;
        }
        Ok(())
    }
}
