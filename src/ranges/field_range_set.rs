//! Canonicalization of predicates into per-field ranges.
//!
//! A `FieldRangeSet` maps field names to interval unions; fields not present
//! carry the universal range. The `FieldRangeSetPair` holds two views of one
//! predicate: the full view (top-level conjuncts only, used for match
//! possibility) and the pessimistic view (with `$or` branches folded in as
//! per-field unions, used for index bound derivation).

use std::collections::BTreeMap;

use crate::key::{string_prefix_successor, KeyValue};
use crate::query::{literal_prefix, ClauseOp, Predicate, SortKey};

use super::interval::{FieldRange, Interval};
use super::pattern::{QueryPattern, RangeKind};

/// Per-field constraint data
#[derive(Debug, Clone)]
struct FieldInfo {
    range: FieldRange,
    clause_count: usize,
    /// Single equality clause on a type whose index key encoding is
    /// injective (string, bool). Numbers are excluded: numeric type
    /// coercion makes their key encoding non-injective.
    exact_equality: bool,
}

/// Per-field interval unions derived from one predicate view.
#[derive(Debug, Clone)]
pub struct FieldRangeSet {
    fields: BTreeMap<String, FieldInfo>,
    special: Option<String>,
    /// Set when some clause constrains more than its range expresses
    /// (regex, negation, existence), so documents must be re-checked.
    residual_required: bool,
}

impl FieldRangeSet {
    /// Build from the top-level conjuncts of a predicate, ignoring branch
    /// lists.
    pub fn from_conjuncts(predicate: &Predicate) -> Self {
        let mut set = Self {
            fields: BTreeMap::new(),
            special: predicate.special_kind().map(str::to_string),
            residual_required: !predicate.or_branches.is_empty()
                || !predicate.nor_branches.is_empty(),
        };
        for clause in &predicate.clauses {
            let (range, residual, exactable) = range_for_op(&clause.op);
            set.residual_required |= residual;
            set.add_constraint(&clause.field, range, exactable);
        }
        set
    }

    fn add_constraint(&mut self, field: &str, range: FieldRange, exactable: bool) {
        match self.fields.get_mut(field) {
            Some(info) => {
                info.range = info.range.intersect(&range);
                info.clause_count += 1;
                info.exact_equality = false;
            }
            None => {
                self.fields.insert(
                    field.to_string(),
                    FieldInfo {
                        range,
                        clause_count: 1,
                        exact_equality: exactable,
                    },
                );
            }
        }
    }

    /// The range for a field; universal when unconstrained.
    pub fn range(&self, field: &str) -> FieldRange {
        self.fields
            .get(field)
            .map(|info| info.range.clone())
            .unwrap_or_else(FieldRange::universal)
    }

    /// True when the field is constrained by exactly one equality clause on
    /// an exactly-representable type.
    pub fn exact_equality(&self, field: &str) -> bool {
        self.fields
            .get(field)
            .is_some_and(|info| info.exact_equality && info.clause_count == 1)
    }

    /// True when any field has an empty range, so no document can match.
    pub fn has_empty_range(&self) -> bool {
        self.fields.values().any(|info| info.range.is_empty())
    }

    /// Number of fields with a non-universal range.
    pub fn num_non_universal(&self) -> usize {
        self.fields
            .values()
            .filter(|info| !info.range.is_universal())
            .count()
    }

    /// Constrained field names in sorted order.
    pub fn constrained_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, info)| !info.range.is_universal())
            .map(|(name, _)| name.as_str())
    }

    /// Special access kind lifted from the predicate, if any.
    pub fn special(&self) -> Option<&str> {
        self.special.as_deref()
    }

    /// True when index bounds alone cannot prove a match.
    pub fn residual_required(&self) -> bool {
        self.residual_required
    }

    /// Shape-only summary of this range set plus a sort, used as the plan
    /// cache key. Constants do not participate.
    pub fn pattern(&self, sort: &SortKey) -> QueryPattern {
        let fields = self
            .fields
            .iter()
            .map(|(name, info)| (name.clone(), RangeKind::of(&info.range)))
            .collect();
        QueryPattern::new(fields, sort)
    }
}

/// The two planner views of one predicate.
#[derive(Debug, Clone)]
pub struct FieldRangeSetPair {
    pessimistic: FieldRangeSet,
    full: FieldRangeSet,
}

impl FieldRangeSetPair {
    /// Canonicalize a predicate.
    pub fn new(predicate: &Predicate) -> Self {
        let full = FieldRangeSet::from_conjuncts(predicate);
        let mut pessimistic = full.clone();

        // Fold $or branches into the pessimistic view: a field constrained
        // in every branch contributes the union of its branch ranges.
        if !predicate.or_branches.is_empty() {
            let branch_sets: Vec<FieldRangeSet> = predicate
                .or_branches
                .iter()
                .map(FieldRangeSet::from_conjuncts)
                .collect();
            let first = &branch_sets[0];
            for field in first.fields.keys() {
                if !branch_sets.iter().all(|s| s.fields.contains_key(field)) {
                    continue;
                }
                let mut unioned = FieldRange::empty();
                for set in &branch_sets {
                    unioned = unioned.union(&set.range(field));
                }
                pessimistic.add_constraint(field, unioned, false);
            }
        }
        Self { pessimistic, full }
    }

    /// The single-range view used for index bound derivation and plan
    /// scoring.
    pub fn pessimistic(&self) -> &FieldRangeSet {
        &self.pessimistic
    }

    /// The top-level conjunct view.
    pub fn full(&self) -> &FieldRangeSet {
        &self.full
    }

    /// True when no document can match the predicate.
    pub fn match_impossible(&self) -> bool {
        self.pessimistic.has_empty_range() || self.full.has_empty_range()
    }

    pub fn special(&self) -> Option<&str> {
        self.pessimistic.special()
    }

    pub fn pattern(&self, sort: &SortKey) -> QueryPattern {
        self.pessimistic.pattern(sort)
    }
}

/// Translate one operator into its range contribution.
///
/// Returns `(range, residual_required, exactable_equality)`.
fn range_for_op(op: &ClauseOp) -> (FieldRange, bool, bool) {
    match op {
        ClauseOp::Eq(v) => {
            let exactable = matches!(
                v,
                serde_json::Value::String(_) | serde_json::Value::Bool(_)
            );
            (
                FieldRange::finite_set(equality_points(v)),
                v.is_array(),
                exactable,
            )
        }
        ClauseOp::Gt(v) => (
            FieldRange::from_intervals(vec![Interval::new(
                KeyValue::from_json(v),
                false,
                KeyValue::MaxKey,
                true,
            )]),
            false,
            false,
        ),
        ClauseOp::Gte(v) => (
            FieldRange::from_intervals(vec![Interval::new(
                KeyValue::from_json(v),
                true,
                KeyValue::MaxKey,
                true,
            )]),
            false,
            false,
        ),
        ClauseOp::Lt(v) => (
            FieldRange::from_intervals(vec![Interval::new(
                KeyValue::MinKey,
                true,
                KeyValue::from_json(v),
                false,
            )]),
            false,
            false,
        ),
        ClauseOp::Lte(v) => (
            FieldRange::from_intervals(vec![Interval::new(
                KeyValue::MinKey,
                true,
                KeyValue::from_json(v),
                true,
            )]),
            false,
            false,
        ),
        ClauseOp::In(values) => (
            FieldRange::finite_set(values.iter().flat_map(equality_points)),
            values.iter().any(serde_json::Value::is_array),
            false,
        ),
        ClauseOp::Regex(pattern) => (regex_range(pattern), true, false),
        ClauseOp::Exists(_) => (FieldRange::universal(), true, false),
        ClauseOp::Not(inner) => match &**inner {
            // $ne: the complement of a point, still a bounded union.
            ClauseOp::Eq(v) => {
                let point = KeyValue::from_json(v);
                (
                    FieldRange::from_intervals(vec![
                        Interval::new(KeyValue::MinKey, true, point.clone(), false),
                        Interval::new(point, false, KeyValue::MaxKey, true),
                    ]),
                    true,
                    false,
                )
            }
            _ => (FieldRange::universal(), true, false),
        },
        ClauseOp::Near(_, _) => (FieldRange::universal(), true, false),
    }
}

/// Points an equality constraint can land on in the index.
///
/// Indexes fan array values out per element, so equality to an array must
/// also scan each element's key; the residual matcher settles the rest.
fn equality_points(v: &serde_json::Value) -> Vec<KeyValue> {
    match v {
        serde_json::Value::Array(items) => {
            let mut points = vec![KeyValue::from_json(v)];
            points.extend(items.iter().map(KeyValue::from_json));
            points
        }
        other => vec![KeyValue::from_json(other)],
    }
}

/// Range for a regex clause: `^prefix` scans `[prefix, successor(prefix))`,
/// anything else is universal with residual matching.
fn regex_range(pattern: &str) -> FieldRange {
    let Some(anchored) = pattern.strip_prefix('^') else {
        return FieldRange::universal();
    };
    let prefix = literal_prefix(anchored);
    if prefix.is_empty() {
        return FieldRange::universal();
    }
    let (hi, hi_inclusive) = match string_prefix_successor(prefix) {
        Some(succ) => (KeyValue::String(succ), false),
        None => (KeyValue::MaxKey, true),
    };
    FieldRange::from_intervals(vec![Interval::new(
        KeyValue::string(prefix),
        true,
        hi,
        hi_inclusive,
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pair(query: serde_json::Value) -> FieldRangeSetPair {
        FieldRangeSetPair::new(&Predicate::parse(&query).unwrap())
    }

    #[test]
    fn test_equality_produces_point() {
        let p = pair(json!({"a": 3}));
        assert!(p.pessimistic().range("a").is_point());
        assert!(p.pessimistic().range("b").is_universal());
    }

    #[test]
    fn test_conjunct_ranges_intersect() {
        let p = pair(json!({"a": {"$gte": 2, "$lte": 4}}));
        let r = p.pessimistic().range("a");
        assert_eq!(r.min_bound(), (KeyValue::int(2), true));
        assert_eq!(r.max_bound(), (KeyValue::int(4), true));
    }

    #[test]
    fn test_contradiction_is_empty() {
        let p = pair(json!({"b": {"$gt": 10, "$lt": 10}}));
        assert!(p.pessimistic().range("b").is_empty());
        assert!(p.match_impossible());
    }

    #[test]
    fn test_empty_in_is_empty() {
        let p = pair(json!({"a": {"$in": []}}));
        assert!(p.pessimistic().range("a").is_empty());
        assert!(p.match_impossible());
    }

    #[test]
    fn test_in_produces_finite_set() {
        let p = pair(json!({"a": {"$in": [2, 3, 6, 9, 11]}}));
        let r = p.pessimistic().range("a");
        assert_eq!(r.finite_points().unwrap().len(), 5);
        assert_eq!(r.min_bound(), (KeyValue::int(2), true));
        assert_eq!(r.max_bound(), (KeyValue::int(11), true));
    }

    #[test]
    fn test_array_equality_includes_element_points() {
        let p = pair(json!({"a": [0, 7]}));
        let r = p.pessimistic().range("a");
        let points = r.finite_points().unwrap();
        // The whole array plus each element.
        assert_eq!(points.len(), 3);
        assert!(points.contains(&&KeyValue::int(0)));
        assert!(points.contains(&&KeyValue::int(7)));
        assert!(p.pessimistic().residual_required());
    }

    #[test]
    fn test_anchored_regex_prefix_range() {
        let p = pair(json!({"a": {"$regex": "^ddd"}}));
        let r = p.pessimistic().range("a");
        assert_eq!(r.min_bound(), (KeyValue::string("ddd"), true));
        assert_eq!(r.max_bound(), (KeyValue::string("dde"), false));
        assert!(p.pessimistic().residual_required());

        // Unanchored regex constrains nothing.
        let p2 = pair(json!({"a": {"$regex": "ddd"}}));
        assert!(p2.pessimistic().range("a").is_universal());
    }

    #[test]
    fn test_ne_is_complement_union() {
        let p = pair(json!({"_id": {"$ne": 0}}));
        let r = p.pessimistic().range("_id");
        assert!(!r.is_universal());
        assert!(!r.is_point());
        assert_eq!(r.intervals().len(), 2);
    }

    #[test]
    fn test_or_branches_fold_into_pessimistic_union() {
        let p = pair(json!({"$or": [{"a": 1}, {"a": 3}]}));
        let r = p.pessimistic().range("a");
        let points = r.finite_points().unwrap();
        assert_eq!(points, vec![&KeyValue::int(1), &KeyValue::int(3)]);
        // The full view keeps only top-level conjuncts.
        assert!(p.full().range("a").is_universal());
    }

    #[test]
    fn test_or_field_missing_in_one_branch_stays_universal() {
        let p = pair(json!({"$or": [{"a": 1}, {"b": 2}]}));
        assert!(p.pessimistic().range("a").is_universal());
        assert!(p.pessimistic().range("b").is_universal());
    }

    #[test]
    fn test_exact_equality_type_asymmetry() {
        // String equality is exactly representable in the index key.
        let p = pair(json!({"a": "b"}));
        assert!(p.pessimistic().exact_equality("a"));
        // Numeric equality is not.
        let p = pair(json!({"a": 4}));
        assert!(!p.pessimistic().exact_equality("a"));
        // Nor are nested object values.
        let p = pair(json!({"a": {"c": "d"}}));
        assert!(!p.pessimistic().exact_equality("a"));
        // Two clauses on one field lose exactness.
        let p = pair(json!({"a": {"$eq": "x", "$gte": "a"}}));
        assert!(!p.pessimistic().exact_equality("a"));
    }

    #[test]
    fn test_num_non_universal() {
        let p = pair(json!({"a": 1, "b": {"$gt": 0}, "c": {"$exists": true}}));
        assert_eq!(p.pessimistic().num_non_universal(), 2);
        let fields: Vec<_> = p.pessimistic().constrained_fields().collect();
        assert_eq!(fields, vec!["a", "b"]);
    }
}
