//! Read-only index enumeration for the planner.

use serde_json::Value;

use super::errors::{CatalogError, CatalogResult};
use super::spec::IndexSpec;

/// Default per-collection index cap.
pub const DEFAULT_INDEX_LIMIT: usize = 10;

/// The set of indexes on one collection, in construction order.
///
/// The `_id` index is always present at ordinal 0. The planner iterates
/// indexes in this stable order; ties between equally good plans go to the
/// first-declared index.
#[derive(Debug, Clone)]
pub struct IndexCatalog {
    indexes: Vec<IndexSpec>,
    limit: usize,
}

impl IndexCatalog {
    /// New catalog with the `_id` index and the default cap.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_INDEX_LIMIT)
    }

    /// New catalog with an explicit cap.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            indexes: vec![IndexSpec::id_index()],
            limit,
        }
    }

    /// All indexes in construction order.
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Number of indexes (including `_id`).
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Index at an ordinal.
    pub fn get(&self, ordinal: usize) -> Option<&IndexSpec> {
        self.indexes.get(ordinal)
    }

    /// Find by key pattern document.
    pub fn find_by_key(&self, key_pattern: &Value) -> Option<(usize, &IndexSpec)> {
        let wanted = IndexSpec::from_key_pattern(key_pattern).ok()?;
        self.indexes
            .iter()
            .enumerate()
            .find(|(_, spec)| spec.key == wanted.key && spec.special == wanted.special)
    }

    /// Find by index name.
    pub fn find_by_name(&self, name: &str) -> Option<(usize, &IndexSpec)> {
        self.indexes
            .iter()
            .enumerate()
            .find(|(_, spec)| spec.name == name)
    }

    /// Register a new index, enforcing the cap and name uniqueness.
    ///
    /// Returns the new index's ordinal.
    pub fn add(&mut self, spec: IndexSpec) -> CatalogResult<usize> {
        if self.indexes.len() >= self.limit {
            return Err(CatalogError::IndexLimitReached(self.limit));
        }
        if self.indexes.iter().any(|existing| existing.name == spec.name) {
            return Err(CatalogError::DuplicateIndex(spec.name));
        }
        self.indexes.push(spec);
        Ok(self.indexes.len() - 1)
    }

    /// Drop an index by name. The `_id` index cannot be dropped.
    pub fn remove(&mut self, name: &str) -> CatalogResult<IndexSpec> {
        let (ordinal, spec) = self
            .find_by_name(name)
            .ok_or_else(|| CatalogError::UnknownIndex(name.to_string()))?;
        if spec.is_id() {
            return Err(CatalogError::UnknownIndex(name.to_string()));
        }
        Ok(self.indexes.remove(ordinal))
    }

    /// Mark an index multikey (an indexed field took an array value).
    pub fn set_multikey(&mut self, ordinal: usize) {
        if let Some(spec) = self.indexes.get_mut(ordinal) {
            spec.multikey = true;
        }
    }
}

impl Default for IndexCatalog {
    fn default() -> Self {
        Self::new()
    }
}
