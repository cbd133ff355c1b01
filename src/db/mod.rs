//! Database facade.
//!
//! Ties one collection's catalog, store and plan cache together and exposes
//! the query entry points: racing `find`, non-racing `find_one`,
//! `run_count`, plan-driven `delete_where`, and index lifecycle operations
//! that keep the plan cache honest.

mod config;
mod errors;

pub use config::PlannerConfig;
pub use errors::{DbError, DbResult};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::cache::PlanCache;
use crate::catalog::{IndexCatalog, IndexSpec};
use crate::key::KeyValue;
use crate::query::{Predicate, Projection, SortKey};
use crate::ranges::FieldRangeSetPair;
use crate::scan::{
    best_guess_cursor, CancellationFlag, MaterializedCursor, MultiPlanScanner, QueryCursor,
    ScanOptions,
};
use crate::store::MemoryCollection;

/// Per-query options for `find`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Sort document, `{field: ±1, ...}`
    pub sort: Option<Value>,
    /// Projection document
    pub projection: Option<Value>,
    /// Index selector: name, key pattern, or `{"$natural": ±1}`
    pub hint: Option<Value>,
    /// Forbid special (non-btree) plans when false
    pub disallow_special: bool,
    /// Ignore the plan cache when true
    pub ignore_recorded_plan: bool,
    /// Absolute deadline
    pub deadline: Option<std::time::Instant>,
    /// Cooperative cancellation
    pub cancel: Option<CancellationFlag>,
}

impl FindOptions {
    fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            allow_special: !self.disallow_special,
            use_recorded_plan: !self.ignore_recorded_plan,
            deadline: self.deadline,
            cancel: self.cancel.clone(),
        }
    }
}

/// One collection: documents, indexes, and the plan cache partition.
pub struct Collection {
    catalog: IndexCatalog,
    store: MemoryCollection,
    plan_cache: Arc<PlanCache>,
    next_auto_id: i64,
}

impl Collection {
    fn new(max_indexes: usize) -> Self {
        Self {
            catalog: IndexCatalog::with_limit(max_indexes),
            store: MemoryCollection::new(),
            plan_cache: Arc::new(PlanCache::new()),
            next_auto_id: 1,
        }
    }

    pub fn catalog(&self) -> &IndexCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &MemoryCollection {
        &self.store
    }

    pub fn plan_cache(&self) -> &Arc<PlanCache> {
        &self.plan_cache
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn insert(&mut self, mut doc: Value) -> DbResult<KeyValue> {
        let Some(map) = doc.as_object_mut() else {
            return Err(crate::store::StoreError::NotAnObject.into());
        };
        if !map.contains_key("_id") {
            let mut entries = serde_json::Map::new();
            entries.insert("_id".to_string(), Value::from(self.next_auto_id));
            entries.extend(std::mem::take(map));
            *map = entries;
            self.next_auto_id += 1;
        }
        let id = KeyValue::from_json(&doc["_id"]);
        let multikey = self.store.insert(self.catalog.indexes(), id.clone(), doc)?;
        for ordinal in multikey {
            self.catalog.set_multikey(ordinal);
        }
        Ok(id)
    }

    fn remove(&mut self, id: &KeyValue) -> Option<Value> {
        // Snapshot specs; removal walks every index tree.
        let specs: Vec<IndexSpec> = self.catalog.indexes().to_vec();
        self.store.remove(&specs, id)
    }
}

/// A process-local database: named collections plus planner configuration.
#[derive(Default)]
pub struct Database {
    collections: BTreeMap<String, Collection>,
    config: PlannerConfig,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PlannerConfig) -> Self {
        Self {
            collections: BTreeMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// The collection, if it exists.
    pub fn collection(&self, ns: &str) -> Option<&Collection> {
        self.collections.get(ns)
    }

    fn collection_or_create(&mut self, ns: &str) -> &mut Collection {
        let max_indexes = self.config.max_indexes;
        self.collections
            .entry(ns.to_string())
            .or_insert_with(|| {
                tracing::debug!(ns, "creating collection");
                Collection::new(max_indexes)
            })
    }

    /// Drop a collection and its plan cache partition.
    pub fn drop_collection(&mut self, ns: &str) -> bool {
        match self.collections.remove(ns) {
            Some(collection) => {
                collection.plan_cache.clear();
                true
            }
            None => false,
        }
    }

    /// Insert a document, creating the collection on first use. Documents
    /// without an `_id` get a generated one.
    pub fn insert(&mut self, ns: &str, doc: Value) -> DbResult<KeyValue> {
        self.collection_or_create(ns).insert(doc)
    }

    /// Create an index and clear the collection's plan cache.
    pub fn create_index(
        &mut self,
        ns: &str,
        key_pattern: &Value,
        name: Option<&str>,
        sparse: bool,
    ) -> DbResult<String> {
        let collection = self.collection_or_create(ns);
        let mut spec = IndexSpec::from_key_pattern(key_pattern)?;
        if let Some(name) = name {
            spec = spec.named(name);
        }
        if sparse {
            spec = spec.sparse();
        }
        let index_name = spec.name.clone();
        let ordinal = collection.catalog.add(spec.clone())?;
        if collection.store.build_index(ordinal, &spec) {
            collection.catalog.set_multikey(ordinal);
        }
        collection.plan_cache.clear();
        tracing::debug!(ns, index = %index_name, "index created, plan cache cleared");
        Ok(index_name)
    }

    /// Drop an index by name and clear the collection's plan cache.
    pub fn drop_index(&mut self, ns: &str, name: &str) -> DbResult<()> {
        let collection = self
            .collections
            .get_mut(ns)
            .ok_or_else(|| DbError::NamespaceNotFound(ns.to_string()))?;
        let (ordinal, _) = collection
            .catalog
            .find_by_name(name)
            .ok_or_else(|| crate::catalog::CatalogError::UnknownIndex(name.to_string()))?;
        collection.catalog.remove(name)?;
        collection.store.drop_index(ordinal);
        collection.plan_cache.clear();
        Ok(())
    }

    fn scanner<'a>(
        &'a self,
        collection: &'a Collection,
        query: &Value,
        options: &FindOptions,
    ) -> DbResult<MultiPlanScanner<'a, MemoryCollection>> {
        let predicate = Predicate::parse(query)?;
        let sort = match &options.sort {
            Some(s) => SortKey::parse(s)?,
            None => SortKey::none(),
        };
        let projection = match &options.projection {
            Some(p) => Some(Projection::parse(p)?),
            None => None,
        };
        let scanner = MultiPlanScanner::make(
            &collection.catalog,
            &collection.store,
            collection.plan_cache.as_ref(),
            predicate,
            sort,
            projection,
            options.hint.clone(),
            options.scan_options(),
            self.config.tuning(),
        )?;
        Ok(scanner)
    }

    /// Open a racing cursor. A missing namespace yields an empty cursor.
    pub fn find<'a>(
        &'a self,
        ns: &str,
        query: &Value,
        options: &FindOptions,
    ) -> DbResult<Box<dyn QueryCursor + 'a>> {
        let Some(collection) = self.collections.get(ns) else {
            return Ok(Box::new(MaterializedCursor::empty()));
        };
        let scanner = self.scanner(collection, query, options)?;
        Ok(scanner.cursor()?)
    }

    /// Run a query to completion, returning the matching documents shaped
    /// by the projection (if any).
    pub fn find_all(&self, ns: &str, query: &Value, options: &FindOptions) -> DbResult<Vec<Value>> {
        let projection = match &options.projection {
            Some(p) => Some(Projection::parse(p)?),
            None => None,
        };
        let mut cursor = self.find(ns, query, options)?;
        let mut out = Vec::new();
        while cursor.ok() {
            if cursor.current_matches() {
                if let Some(doc) = cursor.current() {
                    out.push(match &projection {
                        Some(p) => p.apply(doc),
                        None => doc.clone(),
                    });
                }
            }
            cursor.advance()?;
        }
        Ok(out)
    }

    /// Singleton lookup over the non-racing best-guess path.
    pub fn find_one(&self, ns: &str, query: &Value) -> DbResult<Option<Value>> {
        let Some(collection) = self.collections.get(ns) else {
            return Ok(None);
        };
        let predicate = Predicate::parse(query)?;
        let mut cursor = best_guess_cursor(
            &collection.catalog,
            &collection.store,
            collection.plan_cache.as_ref(),
            predicate,
            SortKey::none(),
            ScanOptions::new(),
        )?;
        while cursor.ok() {
            if cursor.current_matches() {
                return Ok(cursor.current().cloned());
            }
            cursor.advance()?;
        }
        Ok(None)
    }

    /// Non-racing cursor for internal reads.
    pub fn best_guess<'a>(
        &'a self,
        ns: &str,
        query: &Value,
        sort: &Value,
    ) -> DbResult<Box<dyn QueryCursor + 'a>> {
        let Some(collection) = self.collections.get(ns) else {
            return Ok(Box::new(MaterializedCursor::empty()));
        };
        let predicate = Predicate::parse(query)?;
        let sort = SortKey::parse(sort)?;
        Ok(best_guess_cursor(
            &collection.catalog,
            &collection.store,
            collection.plan_cache.as_ref(),
            predicate,
            sort,
            ScanOptions::new(),
        )?)
    }

    /// Count matching documents.
    ///
    /// Returns `-1` for a missing namespace and `0` for an impossible
    /// match, without touching the plan cache in either case.
    pub fn run_count(&self, ns: &str, query: &Value) -> DbResult<i64> {
        let Some(collection) = self.collections.get(ns) else {
            return Ok(-1);
        };
        let predicate = Predicate::parse(query)?;
        if FieldRangeSetPair::new(&predicate).match_impossible() {
            return Ok(0);
        }
        let scanner = MultiPlanScanner::make(
            &collection.catalog,
            &collection.store,
            collection.plan_cache.as_ref(),
            predicate,
            SortKey::none(),
            None,
            None,
            ScanOptions::new(),
            self.config.tuning(),
        )?;
        let mut cursor = scanner.cursor()?;
        let mut count = 0i64;
        while cursor.ok() {
            if cursor.current_matches() {
                count += 1;
            }
            cursor.advance()?;
        }
        Ok(count)
    }

    /// Delete matching documents through the planner, so winning plans are
    /// recorded exactly as for reads. Returns the number deleted.
    pub fn delete_where(&mut self, ns: &str, query: &Value, just_one: bool) -> DbResult<usize> {
        let ids: Vec<KeyValue> = {
            let Some(collection) = self.collections.get(ns) else {
                return Ok(0);
            };
            let scanner = self.scanner(collection, query, &FindOptions::default())?;
            let mut cursor = scanner.cursor()?;
            let mut ids = Vec::new();
            while cursor.ok() {
                if cursor.current_matches() {
                    if let Some(id) = cursor.current().and_then(|d| d.get("_id")) {
                        ids.push(KeyValue::from_json(id));
                        if just_one {
                            break;
                        }
                    }
                }
                cursor.advance()?;
            }
            ids
        };
        let collection = self
            .collections
            .get_mut(ns)
            .ok_or_else(|| DbError::NamespaceNotFound(ns.to_string()))?;
        let mut deleted = 0;
        for id in &ids {
            if collection.remove(id).is_some() {
                deleted += 1;
            }
        }
        tracing::debug!(ns, deleted, "delete_where");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanError;
    use serde_json::json;

    fn ns() -> &'static str {
        "test.things"
    }

    #[test]
    fn test_insert_assigns_ids() {
        let mut db = Database::new();
        let id1 = db.insert(ns(), json!({"a": 1})).unwrap();
        let id2 = db.insert(ns(), json!({"a": 2})).unwrap();
        assert_ne!(id1, id2);
        assert_eq!(db.collection(ns()).unwrap().len(), 2);

        // Caller-provided ids are respected.
        let id3 = db.insert(ns(), json!({"_id": "custom", "a": 3})).unwrap();
        assert_eq!(id3, KeyValue::string("custom"));
    }

    #[test]
    fn test_find_missing_namespace_empty_cursor() {
        let db = Database::new();
        let cursor = db.find("no.such", &json!({}), &FindOptions::default()).unwrap();
        assert!(!cursor.ok());
    }

    #[test]
    fn test_find_all_with_index() {
        let mut db = Database::new();
        db.create_index(ns(), &json!({"a": 1}), None, false).unwrap();
        for i in 0..10 {
            db.insert(ns(), json!({"a": i})).unwrap();
        }
        let docs = db
            .find_all(ns(), &json!({"a": {"$gte": 3, "$lt": 6}}), &FindOptions::default())
            .unwrap();
        assert_eq!(docs.len(), 3);
        assert!(docs.iter().all(|d| (3..6).contains(&d["a"].as_i64().unwrap())));
    }

    #[test]
    fn test_find_sorted_without_index() {
        let mut db = Database::new();
        for a in [3, 1, 2] {
            db.insert(ns(), json!({"a": a})).unwrap();
        }
        let docs = db
            .find_all(
                ns(),
                &json!({}),
                &FindOptions {
                    sort: Some(json!({"a": -1})),
                    ..Default::default()
                },
            )
            .unwrap();
        let values: Vec<i64> = docs.iter().map(|d| d["a"].as_i64().unwrap()).collect();
        assert_eq!(values, vec![3, 2, 1]);
    }

    #[test]
    fn test_run_count_sentinels() {
        let mut db = Database::new();
        assert_eq!(db.run_count("missing.ns", &json!({})).unwrap(), -1);

        db.create_index(ns(), &json!({"a": 1}), None, false).unwrap();
        assert_eq!(db.run_count(ns(), &json!({"a": 4})).unwrap(), 0);

        db.insert(ns(), json!({"a": 1})).unwrap();
        assert_eq!(db.run_count(ns(), &json!({"a": 4})).unwrap(), 0);
        db.insert(ns(), json!({"a": 4})).unwrap();
        assert_eq!(db.run_count(ns(), &json!({"a": 4})).unwrap(), 1);
        db.insert(ns(), json!({"a": 4})).unwrap();
        assert_eq!(db.run_count(ns(), &json!({"a": 4})).unwrap(), 2);
        assert_eq!(db.run_count(ns(), &json!({})).unwrap(), 3);
        assert_eq!(db.run_count(ns(), &json!({"a": {"$gt": 0}})).unwrap(), 3);

        // Impossible match: zero, and nothing recorded.
        assert_eq!(
            db.run_count(ns(), &json!({"a": {"$gt": 0, "$lt": -1}})).unwrap(),
            0
        );
    }

    #[test]
    fn test_delete_where_just_one() {
        let mut db = Database::new();
        db.create_index(ns(), &json!({"a": 1}), None, false).unwrap();
        for i in 0..3 {
            db.insert(ns(), json!({"a": 1, "n": i})).unwrap();
        }
        let deleted = db.delete_where(ns(), &json!({"a": 1}), true).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.run_count(ns(), &json!({"a": 1})).unwrap(), 2);
    }

    #[test]
    fn test_index_lifecycle_clears_plan_cache() {
        let mut db = Database::new();
        db.create_index(ns(), &json!({"a": 1}), None, false).unwrap();
        db.insert(ns(), json!({"a": 1})).unwrap();

        // Seed the cache through a find.
        db.find_all(ns(), &json!({"a": 1}), &FindOptions::default()).unwrap();
        assert!(!db.collection(ns()).unwrap().plan_cache().is_empty());

        db.create_index(ns(), &json!({"b": 1}), None, false).unwrap();
        assert!(db.collection(ns()).unwrap().plan_cache().is_empty());

        db.find_all(ns(), &json!({"a": 1}), &FindOptions::default()).unwrap();
        assert!(!db.collection(ns()).unwrap().plan_cache().is_empty());

        db.drop_index(ns(), "b_1").unwrap();
        assert!(db.collection(ns()).unwrap().plan_cache().is_empty());
    }

    #[test]
    fn test_find_one_uses_best_guess() {
        let mut db = Database::new();
        db.create_index(ns(), &json!({"a": 1}), None, false).unwrap();
        db.insert(ns(), json!({"a": 1})).unwrap();
        db.insert(ns(), json!({"a": 2})).unwrap();

        let found = db.find_one(ns(), &json!({"a": 2})).unwrap().unwrap();
        assert_eq!(found["a"], json!(2));
        assert!(db.find_one(ns(), &json!({"a": 9})).unwrap().is_none());
        assert!(db.find_one("no.such", &json!({})).unwrap().is_none());
    }

    #[test]
    fn test_hint_errors_propagate() {
        let mut db = Database::new();
        db.insert(ns(), json!({"a": 1})).unwrap();
        let err = db
            .find_all(
                ns(),
                &json!({"a": 1}),
                &FindOptions {
                    hint: Some(json!("nope")),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err, DbError::Plan(PlanError::UnknownIndexName("nope".into())));
    }

    #[test]
    fn test_drop_collection() {
        let mut db = Database::new();
        db.insert(ns(), json!({"a": 1})).unwrap();
        assert!(db.drop_collection(ns()));
        assert!(!db.drop_collection(ns()));
        assert_eq!(db.run_count(ns(), &json!({})).unwrap(), -1);
    }
}
