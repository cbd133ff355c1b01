//! In-memory collection store.
//!
//! Documents live in a `BTreeMap` keyed by `_id` (this is also the `_id`
//! index); each secondary index is a `BTreeMap` from direction-encoded
//! composite keys to the sorted set of document ids carrying that key.
//! Encoding the key pattern's per-field directions into the stored keys
//! makes plain map traversal equal index-order traversal, so a reverse
//! range scan is just reverse iteration. Iteration order is deterministic
//! everywhere.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use serde_json::Value;

use crate::catalog::IndexSpec;
use crate::key::{CompositeKey, KeyValue};
use crate::query::SortDirection;
use crate::scan::StorageAccess;

use super::errors::{StoreError, StoreResult};

/// One slot of a stored index key; descending fields compare reversed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DirectedKey {
    value: KeyValue,
    descending: bool,
}

impl Ord for DirectedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let ord = self.value.cmp(&other.value);
        if self.descending {
            ord.reverse()
        } else {
            ord
        }
    }
}

impl PartialOrd for DirectedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type StoredKey = Vec<DirectedKey>;
type IndexTree = BTreeMap<StoredKey, BTreeSet<KeyValue>>;

fn directed(key: CompositeKey, descending: &[bool]) -> StoredKey {
    key.into_iter()
        .enumerate()
        .map(|(slot, value)| DirectedKey {
            value,
            descending: descending.get(slot).copied().unwrap_or(false),
        })
        .collect()
}

fn descending_flags(spec: &IndexSpec) -> Vec<bool> {
    spec.key
        .iter()
        .map(|(_, dir)| *dir == SortDirection::Desc)
        .collect()
}

/// One collection's documents and index data.
///
/// Index trees are kept positionally parallel to the catalog's ordinals;
/// the collection handle that owns both keeps them in sync.
#[derive(Debug, Default)]
pub struct MemoryCollection {
    docs: BTreeMap<KeyValue, Value>,
    index_data: Vec<IndexTree>,
    index_descending: Vec<Vec<bool>>,
}

impl MemoryCollection {
    /// Empty collection with an index tree for the `_id` index.
    pub fn new() -> Self {
        Self {
            docs: BTreeMap::new(),
            index_data: vec![IndexTree::new()],
            index_descending: vec![vec![false]],
        }
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Composite index keys for a document, and whether an array value was
    /// seen on a key field (multikey).
    ///
    /// A missing field is indexed as null; an array field contributes one
    /// key per element. Sparse indexes skip documents missing every key
    /// field.
    fn keys_for(spec: &IndexSpec, doc: &Value) -> (Vec<CompositeKey>, bool) {
        if spec.sparse && spec.field_names().all(|f| doc.get(f).is_none()) {
            return (vec![], false);
        }
        let mut keys: Vec<CompositeKey> = vec![vec![]];
        let mut multikey = false;
        for (field, _) in &spec.key {
            let values: Vec<KeyValue> = match doc.get(field) {
                Some(Value::Array(items)) if !items.is_empty() => {
                    multikey = true;
                    items.iter().map(KeyValue::from_json).collect()
                }
                Some(v) => vec![KeyValue::from_json(v)],
                None => vec![KeyValue::Null],
            };
            let mut extended = Vec::with_capacity(keys.len() * values.len());
            for key in &keys {
                for value in &values {
                    let mut next = key.clone();
                    next.push(value.clone());
                    extended.push(next);
                }
            }
            keys = extended;
        }
        (keys, multikey)
    }

    /// Insert a document under its id, updating every index tree.
    ///
    /// Returns the ordinals that observed an array value (so the caller can
    /// flag those indexes multikey).
    pub fn insert(
        &mut self,
        specs: &[IndexSpec],
        id: KeyValue,
        doc: Value,
    ) -> StoreResult<Vec<usize>> {
        if !doc.is_object() {
            return Err(StoreError::NotAnObject);
        }
        if self.docs.contains_key(&id) {
            return Err(StoreError::DuplicateId(id.to_string()));
        }
        self.sync_slots(specs);
        let mut multikey_ordinals = Vec::new();
        for (ordinal, spec) in specs.iter().enumerate() {
            let (keys, multikey) = Self::keys_for(spec, &doc);
            if multikey {
                multikey_ordinals.push(ordinal);
            }
            let descending = &self.index_descending[ordinal];
            for key in keys {
                self.index_data[ordinal]
                    .entry(directed(key, descending))
                    .or_default()
                    .insert(id.clone());
            }
        }
        self.docs.insert(id, doc);
        Ok(multikey_ordinals)
    }

    /// Remove a document by id, updating every index tree.
    pub fn remove(&mut self, specs: &[IndexSpec], id: &KeyValue) -> Option<Value> {
        let doc = self.docs.remove(id)?;
        for (ordinal, spec) in specs.iter().enumerate() {
            let (keys, _) = Self::keys_for(spec, &doc);
            let Some(tree) = self.index_data.get_mut(ordinal) else {
                continue;
            };
            let descending = descending_flags(spec);
            for key in keys {
                let stored = directed(key, &descending);
                if let Some(ids) = tree.get_mut(&stored) {
                    ids.remove(id);
                    if ids.is_empty() {
                        tree.remove(&stored);
                    }
                }
            }
        }
        Some(doc)
    }

    /// Build the index tree for a newly created index over existing
    /// documents. Returns true when any document made it multikey.
    pub fn build_index(&mut self, ordinal: usize, spec: &IndexSpec) -> bool {
        while self.index_data.len() <= ordinal {
            self.index_data.push(IndexTree::new());
            self.index_descending.push(vec![]);
        }
        let descending = descending_flags(spec);
        let mut tree = IndexTree::new();
        let mut multikey = false;
        for (id, doc) in &self.docs {
            let (keys, mk) = Self::keys_for(spec, doc);
            multikey |= mk;
            for key in keys {
                tree.entry(directed(key, &descending))
                    .or_default()
                    .insert(id.clone());
            }
        }
        self.index_data[ordinal] = tree;
        self.index_descending[ordinal] = descending;
        multikey
    }

    /// Drop the index tree at an ordinal (the catalog drops the spec; the
    /// remaining trees shift down with it).
    pub fn drop_index(&mut self, ordinal: usize) {
        if ordinal < self.index_data.len() {
            self.index_data.remove(ordinal);
            self.index_descending.remove(ordinal);
        }
    }

    fn sync_slots(&mut self, specs: &[IndexSpec]) {
        while self.index_data.len() < specs.len() {
            self.index_data.push(IndexTree::new());
            self.index_descending.push(vec![]);
        }
        for (ordinal, spec) in specs.iter().enumerate() {
            if self.index_descending[ordinal].len() != spec.arity() {
                self.index_descending[ordinal] = descending_flags(spec);
            }
        }
    }
}

impl StorageAccess for MemoryCollection {
    fn collection_scan_ids(&self, direction: i32) -> Vec<KeyValue> {
        if direction < 0 {
            self.docs.keys().rev().cloned().collect()
        } else {
            self.docs.keys().cloned().collect()
        }
    }

    fn index_scan_ids(
        &self,
        ordinal: usize,
        start: &CompositeKey,
        start_inclusive: bool,
        end: &CompositeKey,
        end_inclusive: bool,
        direction: i32,
    ) -> Vec<KeyValue> {
        let Some(tree) = self.index_data.get(ordinal) else {
            return vec![];
        };
        let descending = self
            .index_descending
            .get(ordinal)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        // The plan orients start/end along the scan direction; the map
        // range wants bounds ascending in stored-key order.
        let (lo, lo_inc, hi, hi_inc) = if direction < 0 {
            (end, end_inclusive, start, start_inclusive)
        } else {
            (start, start_inclusive, end, end_inclusive)
        };
        let lo = directed(lo.clone(), descending);
        let hi = directed(hi.clone(), descending);
        if lo > hi || (lo == hi && !(lo_inc && hi_inc)) {
            return vec![];
        }
        let lo_bound: Bound<&StoredKey> = if lo_inc {
            Bound::Included(&lo)
        } else {
            Bound::Excluded(&lo)
        };
        let hi_bound: Bound<&StoredKey> = if hi_inc {
            Bound::Included(&hi)
        } else {
            Bound::Excluded(&hi)
        };
        let mut out = Vec::new();
        let entries = tree.range::<StoredKey, _>((lo_bound, hi_bound));
        if direction < 0 {
            for (_, ids) in entries.rev() {
                out.extend(ids.iter().rev().cloned());
            }
        } else {
            for (_, ids) in entries {
                out.extend(ids.iter().cloned());
            }
        }
        out
    }

    fn fetch(&self, id: &KeyValue) -> Option<Value> {
        self.docs.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs(keys: &[serde_json::Value]) -> Vec<IndexSpec> {
        let mut out = vec![IndexSpec::id_index()];
        for key in keys {
            out.push(IndexSpec::from_key_pattern(key).unwrap());
        }
        out
    }

    fn seed(store: &mut MemoryCollection, specs: &[IndexSpec], docs: Vec<Value>) {
        for (i, doc) in docs.into_iter().enumerate() {
            store.insert(specs, KeyValue::int(i as i64), doc).unwrap();
        }
    }

    #[test]
    fn test_insert_and_fetch() {
        let specs = specs(&[]);
        let mut store = MemoryCollection::new();
        store
            .insert(&specs, KeyValue::int(1), json!({"_id": 1, "a": "x"}))
            .unwrap();
        assert_eq!(store.fetch(&KeyValue::int(1)), Some(json!({"_id": 1, "a": "x"})));
        assert_eq!(store.fetch(&KeyValue::int(2)), None);

        let err = store
            .insert(&specs, KeyValue::int(1), json!({"_id": 1}))
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateId("1".into()));
    }

    #[test]
    fn test_index_scan_ascending_and_descending() {
        let specs = specs(&[json!({"a": 1})]);
        let mut store = MemoryCollection::new();
        seed(&mut store, &specs, (0..5).map(|i| json!({"a": i})).collect());

        let asc = store.index_scan_ids(
            1,
            &vec![KeyValue::int(1)],
            true,
            &vec![KeyValue::int(3)],
            true,
            1,
        );
        assert_eq!(asc, vec![KeyValue::int(1), KeyValue::int(2), KeyValue::int(3)]);

        // Reverse scan: the plan hands bounds oriented along the scan.
        let desc = store.index_scan_ids(
            1,
            &vec![KeyValue::int(3)],
            true,
            &vec![KeyValue::int(1)],
            true,
            -1,
        );
        assert_eq!(desc, vec![KeyValue::int(3), KeyValue::int(2), KeyValue::int(1)]);
    }

    #[test]
    fn test_index_scan_exclusive_bound() {
        let specs = specs(&[json!({"a": 1})]);
        let mut store = MemoryCollection::new();
        seed(&mut store, &specs, (0..4).map(|i| json!({"a": i})).collect());
        let ids = store.index_scan_ids(
            1,
            &vec![KeyValue::int(1)],
            false,
            &vec![KeyValue::int(3)],
            true,
            1,
        );
        assert_eq!(ids, vec![KeyValue::int(2), KeyValue::int(3)]);
    }

    #[test]
    fn test_descending_field_traversal_order() {
        // Index {a:-1, b:1}: natural order is a descending, then b
        // ascending.
        let specs = specs(&[json!({"a": -1, "b": 1})]);
        let mut store = MemoryCollection::new();
        seed(
            &mut store,
            &specs,
            vec![
                json!({"a": 1, "b": 2}), // id 0
                json!({"a": 2, "b": 9}), // id 1
                json!({"a": 1, "b": 1}), // id 2
            ],
        );
        // Forward scan over everything: start pads (min, min) per slot
        // orientation, end pads (max, max).
        let forward = store.index_scan_ids(
            1,
            &vec![KeyValue::MaxKey, KeyValue::MinKey],
            true,
            &vec![KeyValue::MinKey, KeyValue::MaxKey],
            true,
            1,
        );
        assert_eq!(forward, vec![KeyValue::int(1), KeyValue::int(2), KeyValue::int(0)]);

        // Reverse scan flips to a ascending, b descending.
        let reverse = store.index_scan_ids(
            1,
            &vec![KeyValue::MinKey, KeyValue::MaxKey],
            true,
            &vec![KeyValue::MaxKey, KeyValue::MinKey],
            true,
            -1,
        );
        assert_eq!(reverse, vec![KeyValue::int(0), KeyValue::int(2), KeyValue::int(1)]);
    }

    #[test]
    fn test_composite_key_padding_scan() {
        let specs = specs(&[json!({"a": 1, "b": 1})]);
        let mut store = MemoryCollection::new();
        seed(
            &mut store,
            &specs,
            vec![
                json!({"a": 1, "b": 9}),
                json!({"a": 2, "b": 0}),
                json!({"a": 2, "b": 5}),
                json!({"a": 3, "b": 1}),
            ],
        );
        // All of a == 2, any b.
        let ids = store.index_scan_ids(
            1,
            &vec![KeyValue::int(2), KeyValue::MinKey],
            true,
            &vec![KeyValue::int(2), KeyValue::MaxKey],
            true,
            1,
        );
        assert_eq!(ids, vec![KeyValue::int(1), KeyValue::int(2)]);
    }

    #[test]
    fn test_missing_field_indexed_as_null() {
        let specs = specs(&[json!({"a": 1})]);
        let mut store = MemoryCollection::new();
        seed(&mut store, &specs, vec![json!({"b": 1}), json!({"a": 5})]);
        let ids = store.index_scan_ids(
            1,
            &vec![KeyValue::Null],
            true,
            &vec![KeyValue::Null],
            true,
            1,
        );
        assert_eq!(ids, vec![KeyValue::int(0)]);
    }

    #[test]
    fn test_sparse_index_skips_missing() {
        let mut sparse = IndexSpec::from_key_pattern(&json!({"a": 1})).unwrap();
        sparse.sparse = true;
        let specs = vec![IndexSpec::id_index(), sparse];
        let mut store = MemoryCollection::new();
        seed(&mut store, &specs, vec![json!({"b": 1}), json!({"a": 5})]);
        // Only the document carrying `a` is in the sparse tree.
        let ids = store.index_scan_ids(
            1,
            &vec![KeyValue::MinKey],
            true,
            &vec![KeyValue::MaxKey],
            true,
            1,
        );
        assert_eq!(ids, vec![KeyValue::int(1)]);
    }

    #[test]
    fn test_array_values_fan_out_and_report_multikey() {
        let specs = specs(&[json!({"a": 1})]);
        let mut store = MemoryCollection::new();
        let multikey = store
            .insert(&specs, KeyValue::int(0), json!({"a": [1, 2]}))
            .unwrap();
        assert_eq!(multikey, vec![1]);

        for value in [1, 2] {
            let ids = store.index_scan_ids(
                1,
                &vec![KeyValue::int(value)],
                true,
                &vec![KeyValue::int(value)],
                true,
                1,
            );
            assert_eq!(ids, vec![KeyValue::int(0)], "element {value}");
        }
    }

    #[test]
    fn test_remove_cleans_indexes() {
        let specs = specs(&[json!({"a": 1})]);
        let mut store = MemoryCollection::new();
        seed(&mut store, &specs, vec![json!({"a": 7}), json!({"a": 7})]);
        store.remove(&specs, &KeyValue::int(0));
        let ids = store.index_scan_ids(
            1,
            &vec![KeyValue::int(7)],
            true,
            &vec![KeyValue::int(7)],
            true,
            1,
        );
        assert_eq!(ids, vec![KeyValue::int(1)]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_build_index_over_existing_data() {
        let base = specs(&[]);
        let mut store = MemoryCollection::new();
        seed(&mut store, &base, vec![json!({"a": 2}), json!({"a": [3, 4]})]);

        let spec = IndexSpec::from_key_pattern(&json!({"a": 1})).unwrap();
        let multikey = store.build_index(1, &spec);
        assert!(multikey);
        let ids = store.index_scan_ids(
            1,
            &vec![KeyValue::int(2)],
            true,
            &vec![KeyValue::int(4)],
            true,
            1,
        );
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_collection_scan_order() {
        let specs = specs(&[]);
        let mut store = MemoryCollection::new();
        seed(&mut store, &specs, vec![json!({}), json!({}), json!({})]);
        assert_eq!(
            store.collection_scan_ids(1),
            vec![KeyValue::int(0), KeyValue::int(1), KeyValue::int(2)]
        );
        assert_eq!(
            store.collection_scan_ids(-1),
            vec![KeyValue::int(2), KeyValue::int(1), KeyValue::int(0)]
        );
    }
}
