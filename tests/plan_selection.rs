//! Plan selection tests
//!
//! End-to-end checks that the plan set picks the expected access paths:
//! - single optimal plans collapse the candidate set
//! - sparse and special index exclusion rules
//! - impossible matches short-circuit
//! - diagnostic rendering never panics

use quilldb::{Database, FindOptions};
use serde_json::json;

const NS: &str = "unittests.plan_selection";

fn db_with_indexes(keys: &[serde_json::Value]) -> Database {
    let mut db = Database::new();
    for key in keys {
        db.create_index(NS, key, None, false).unwrap();
    }
    db
}

// =============================================================================
// Simple ordering scenarios
// =============================================================================

/// Index {a:1}, empty predicate, sort {a:1}: one plan, forward index scan.
#[test]
fn test_simple_order_single_plan() {
    let mut db = db_with_indexes(&[json!({"a": 1})]);
    for i in [2, 0, 1] {
        db.insert(NS, json!({"a": i})).unwrap();
    }
    let docs = db
        .find_all(
            NS,
            &json!({}),
            &FindOptions {
                sort: Some(json!({"a": 1})),
                ..Default::default()
            },
        )
        .unwrap();
    let values: Vec<i64> = docs.iter().map(|d| d["a"].as_i64().unwrap()).collect();
    assert_eq!(values, vec![0, 1, 2]);
}

/// Index {a:-1,b:1}, sort {a:1,b:-1}: served by a reverse scan.
#[test]
fn test_reverse_scan_serves_flipped_sort() {
    let mut db = db_with_indexes(&[json!({"a": -1, "b": 1})]);
    db.insert(NS, json!({"a": 1, "b": 1})).unwrap();
    db.insert(NS, json!({"a": 1, "b": 2})).unwrap();
    db.insert(NS, json!({"a": 2, "b": 9})).unwrap();

    let docs = db
        .find_all(
            NS,
            &json!({}),
            &FindOptions {
                sort: Some(json!({"a": 1, "b": -1})),
                ..Default::default()
            },
        )
        .unwrap();
    let pairs: Vec<(i64, i64)> = docs
        .iter()
        .map(|d| (d["a"].as_i64().unwrap(), d["b"].as_i64().unwrap()))
        .collect();
    assert_eq!(pairs, vec![(1, 2), (1, 1), (2, 9)]);
}

// =============================================================================
// Impossible matches
// =============================================================================

/// An empty $in on an indexed field matches nothing and writes no cache
/// entry.
#[test]
fn test_impossible_in_yields_nothing() {
    let mut db = db_with_indexes(&[json!({"a": 1})]);
    for i in 0..5 {
        db.insert(NS, json!({"a": i})).unwrap();
    }
    assert_eq!(db.run_count(NS, &json!({"a": {"$in": []}})).unwrap(), 0);

    let cursor = db
        .find(NS, &json!({"a": {"$in": []}}), &FindOptions::default())
        .unwrap();
    assert!(!cursor.ok());
    assert!(db.collection(NS).unwrap().plan_cache().is_empty());
}

/// Contradictory range bounds behave the same way.
#[test]
fn test_contradictory_range_counts_zero() {
    let mut db = db_with_indexes(&[json!({"a": 1})]);
    db.insert(NS, json!({"a": 1})).unwrap();
    assert_eq!(
        db.run_count(NS, &json!({"a": {"$gt": 0, "$lt": -1}})).unwrap(),
        0
    );
}

// =============================================================================
// Sparse index exclusion
// =============================================================================

/// A sparse index cannot serve $exists:false; the collection scan answers.
#[test]
fn test_sparse_index_excluded_for_exists_false() {
    let mut db = Database::new();
    db.create_index(NS, &json!({"a": 1}), None, true).unwrap();
    db.insert(NS, json!({"a": 1})).unwrap();
    db.insert(NS, json!({"b": 2})).unwrap();

    let docs = db
        .find_all(NS, &json!({"a": {"$exists": false}}), &FindOptions::default())
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["b"], json!(2));
}

// =============================================================================
// $in interval scans
// =============================================================================

/// The $in bounds enclose the set; the matcher drops in-between values.
#[test]
fn test_in_query_intervals() {
    let mut db = db_with_indexes(&[json!({"a": 1})]);
    for i in 0..10 {
        db.insert(NS, json!({"a": i})).unwrap();
    }
    let query = json!({"a": {"$in": [2, 3, 6, 9, 11]}});
    let docs = db.find_all(NS, &query, &FindOptions::default()).unwrap();
    let values: Vec<i64> = docs.iter().map(|d| d["a"].as_i64().unwrap()).collect();
    assert_eq!(values, vec![2, 3, 6, 9]);

    // And in reverse order.
    let docs = db
        .find_all(
            NS,
            &query,
            &FindOptions {
                sort: Some(json!({"a": -1})),
                hint: Some(json!({"a": 1})),
                ..Default::default()
            },
        )
        .unwrap();
    let values: Vec<i64> = docs.iter().map(|d| d["a"].as_i64().unwrap()).collect();
    assert_eq!(values, vec![9, 6, 3, 2]);
}

/// Equality on a prefix then $in on the next field.
#[test]
fn test_equality_then_in() {
    let mut db = db_with_indexes(&[json!({"a": 1, "b": 1})]);
    for i in 0..10 {
        db.insert(NS, json!({"a": 5, "b": i})).unwrap();
    }
    let docs = db
        .find_all(
            NS,
            &json!({"a": 5, "b": {"$in": [2, 3, 6, 9, 11]}}),
            &FindOptions::default(),
        )
        .unwrap();
    let values: Vec<i64> = docs.iter().map(|d| d["b"].as_i64().unwrap()).collect();
    assert_eq!(values, vec![2, 3, 6, 9]);

    // A range on the prefix with $in behind it still answers correctly.
    let docs = db
        .find_all(
            NS,
            &json!({"a": {"$gte": 5}, "b": {"$in": [2, 3, 6, 9, 11]}}),
            &FindOptions::default(),
        )
        .unwrap();
    let values: Vec<i64> = docs.iter().map(|d| d["b"].as_i64().unwrap()).collect();
    assert_eq!(values, vec![2, 3, 6, 9]);
}

// =============================================================================
// Finite-set prefix with order suffix
// =============================================================================

/// {a:10, b:{$in:[0,1]}} sorted by c streams in order from index {a,b,c}
/// without a post-sort.
#[test]
fn test_finite_set_order_suffix_streams_sorted() {
    let mut db = db_with_indexes(&[json!({"a": 1, "b": 1, "c": 1})]);
    let rows = [
        (10, 0, 5),
        (10, 1, 1),
        (10, 0, 2),
        (10, 1, 9),
        (10, 2, 0), // b=2 excluded by the $in
        (11, 0, 3), // a=11 excluded by the equality
    ];
    for (a, b, c) in rows {
        db.insert(NS, json!({"a": a, "b": b, "c": c})).unwrap();
    }
    let docs = db
        .find_all(
            NS,
            &json!({"a": 10, "b": {"$in": [0, 1]}}),
            &FindOptions {
                sort: Some(json!({"c": 1})),
                ..Default::default()
            },
        )
        .unwrap();
    let values: Vec<i64> = docs.iter().map(|d| d["c"].as_i64().unwrap()).collect();
    assert_eq!(values, vec![1, 2, 5, 9]);
}

// =============================================================================
// Special (2d) plan coexistence
// =============================================================================

/// Without a geo operator the btree plan answers, even when a 2d index on
/// the same field exists.
#[test]
fn test_btree_preferred_without_geo_operator() {
    let mut db = Database::new();
    db.create_index(NS, &json!({"a": "2d"}), None, false).unwrap();
    db.create_index(NS, &json!({"a": 1}), None, false).unwrap();
    db.insert(NS, json!({"a": [0, 0], "b": 1})).unwrap();
    db.insert(NS, json!({"a": [5, 5], "b": 1})).unwrap();

    let docs = db
        .find_all(NS, &json!({"a": [0, 0], "b": 1}), &FindOptions::default())
        .unwrap();
    assert_eq!(docs.len(), 1);
}

/// A $near query takes the special path; with special plans disallowed it
/// is a user error.
#[test]
fn test_near_requires_special_allowance() {
    let mut db = Database::new();
    db.create_index(NS, &json!({"a": "2d"}), None, false).unwrap();
    db.insert(NS, json!({"a": [0, 0]})).unwrap();

    let docs = db
        .find_all(NS, &json!({"a": {"$near": [0, 0]}}), &FindOptions::default())
        .unwrap();
    assert_eq!(docs.len(), 1);

    let err = db
        .find_all(
            NS,
            &json!({"a": {"$near": [0, 0]}}),
            &FindOptions {
                disallow_special: true,
                ..Default::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.code(), "QUILL_PLAN_SPECIAL_NOT_ALLOWED");
}

// =============================================================================
// Hints
// =============================================================================

/// Hints force the named plan; unknown hints are user errors.
#[test]
fn test_hint_selection_and_errors() {
    let mut db = db_with_indexes(&[json!({"a": 1}), json!({"b": 1})]);
    for i in 0..4 {
        db.insert(NS, json!({"a": i, "b": 3 - i})).unwrap();
    }

    for hint in [json!({"a": 1}), json!("a_1"), json!({"$natural": 1})] {
        let docs = db
            .find_all(
                NS,
                &json!({"a": {"$lt": 2}}),
                &FindOptions {
                    hint: Some(hint),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(docs.len(), 2);
    }

    let err = db
        .find_all(
            NS,
            &json!({"a": 1}),
            &FindOptions {
                hint: Some(json!({"c": 1})),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.code(), "QUILL_PLAN_UNKNOWN_INDEX_KEY");
}

// =============================================================================
// Projection covering
// =============================================================================

/// A multikey scan whose bounds span several element keys still surfaces
/// each document once.
#[test]
fn test_multikey_scan_deduplicates() {
    let mut db = db_with_indexes(&[json!({"a": 1})]);
    db.insert(NS, json!({"a": [1, 2]})).unwrap();
    db.insert(NS, json!({"a": 3})).unwrap();

    let docs = db
        .find_all(NS, &json!({"a": {"$gte": 1}}), &FindOptions::default())
        .unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(db.run_count(NS, &json!({"a": {"$gte": 1}})).unwrap(), 2);
}

/// A projection covered by the index still returns correct documents when
/// the index later turns multikey.
#[test]
fn test_projection_with_multikey_transition() {
    let mut db = db_with_indexes(&[json!({"a": 1})]);
    db.insert(NS, json!({"a": 1})).unwrap();
    db.insert(NS, json!({"a": [1, 2]})).unwrap();

    let docs = db
        .find_all(
            NS,
            &json!({"a": 1}),
            &FindOptions {
                projection: Some(json!({"_id": 0, "a": 1})),
                ..Default::default()
            },
        )
        .unwrap();
    // Both documents index a key of 1, and results carry only the
    // projected field.
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|d| d.get("_id").is_none()));
    assert!(docs.contains(&json!({"a": 1})));
    assert!(docs.contains(&json!({"a": [1, 2]})));
}
