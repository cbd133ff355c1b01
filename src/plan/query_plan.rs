//! Candidate access paths.
//!
//! A `QueryPlan` describes one way to answer a query: a btree index scan
//! with composite bounds, a special (non-btree) access path, or a full
//! collection scan. Plans are immutable once constructed; the plan set and
//! the scanner only read them.

use std::fmt;

use serde_json::Value;

use crate::catalog::IndexSpec;
use crate::key::{CompositeKey, KeyValue};
use crate::query::{Predicate, Projection, SortKey};
use crate::ranges::FieldRangeSetPair;

/// How useful a plan is for its query, worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Utility {
    /// Cannot produce any document
    Impossible,
    /// Must not be selected (sparse index vs. existence predicate)
    Disallowed,
    /// Neither bounds the scan nor serves the sort
    Unhelpful,
    /// Bounds the scan or serves the sort
    Helpful,
    /// Index key prefix exactly covers the query's equalities and sort
    Optimal,
}

impl Utility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Utility::Impossible => "impossible",
            Utility::Disallowed => "disallowed",
            Utility::Unhelpful => "unhelpful",
            Utility::Helpful => "helpful",
            Utility::Optimal => "optimal",
        }
    }
}

/// The access path a plan scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPath {
    /// Full collection scan in natural order
    CollectionScan,
    /// Btree index scan by catalog ordinal
    Btree { ordinal: usize },
    /// Special (non-btree) access path by catalog ordinal
    Special { ordinal: usize, kind: String },
}

/// One candidate access path with its score and derived bounds.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    access: AccessPath,
    index_key: Value,
    direction: i32,
    start_key: CompositeKey,
    start_inclusive: bool,
    end_key: CompositeKey,
    end_inclusive: bool,
    utility: Utility,
    scan_and_order_required: bool,
    exact_key_match: bool,
    key_fields_only: bool,
    finite_set_order_suffix: bool,
    /// Points per finite-prefix field, ascending; used to enumerate
    /// sub-scans when `finite_set_order_suffix` is set.
    finite_prefix: Vec<Vec<KeyValue>>,
}

impl QueryPlan {
    /// Build the collection scan plan.
    pub fn collection_scan(frsp: &FieldRangeSetPair, sort: &SortKey, natural_direction: i32) -> Self {
        let direction = if natural_direction < 0 { -1 } else { 1 };
        let utility = if frsp.match_impossible() {
            Utility::Impossible
        } else {
            Utility::Helpful
        };
        Self {
            access: AccessPath::CollectionScan,
            index_key: serde_json::json!({ "$natural": direction }),
            direction,
            start_key: vec![],
            start_inclusive: true,
            end_key: vec![],
            end_inclusive: true,
            utility,
            scan_and_order_required: !sort.is_empty(),
            exact_key_match: false,
            key_fields_only: false,
            finite_set_order_suffix: false,
            finite_prefix: vec![],
        }
    }

    /// Build a plan over one index.
    pub fn for_index(
        ordinal: usize,
        spec: &IndexSpec,
        frsp: &FieldRangeSetPair,
        predicate: &Predicate,
        sort: &SortKey,
        projection: Option<&Projection>,
    ) -> Self {
        if let Some(kind) = &spec.special {
            return Self::for_special(ordinal, spec, kind.clone(), frsp, sort);
        }
        let pess = frsp.pessimistic();

        let mut plan = Self {
            access: AccessPath::Btree { ordinal },
            index_key: spec.key_json(),
            direction: 1,
            start_key: vec![],
            start_inclusive: true,
            end_key: vec![],
            end_inclusive: true,
            utility: Utility::Helpful,
            scan_and_order_required: false,
            exact_key_match: false,
            key_fields_only: false,
            finite_set_order_suffix: false,
            finite_prefix: vec![],
        };

        // An empty range on an indexed field means nothing can match.
        if spec.field_names().any(|f| pess.range(f).is_empty()) {
            plan.utility = Utility::Impossible;
            return plan;
        }

        // A sparse index omits documents without the field; predicates that
        // must see such documents cannot use it.
        if spec.sparse && predicate.excludes_sparse_indexes() {
            plan.utility = Utility::Disallowed;
            return plan;
        }

        // Finite-set prefix followed by an in-order suffix: the scanner can
        // enumerate point sub-scans and stream them in index order, so the
        // sort is served without a post-sort.
        let (fsos, fsos_direction, finite_prefix) = finite_set_order_suffix(spec, pess, sort);

        if sort.is_empty() {
            plan.scan_and_order_required = false;
            plan.direction = 1;
        } else if fsos {
            plan.scan_and_order_required = false;
            plan.direction = fsos_direction;
        } else {
            match sort_direction_on_index(spec, pess, sort) {
                Some(direction) => {
                    plan.scan_and_order_required = false;
                    plan.direction = direction;
                }
                None => {
                    plan.scan_and_order_required = true;
                    plan.direction = 0;
                }
            }
        }
        plan.finite_set_order_suffix = fsos;
        plan.finite_prefix = finite_prefix;

        plan.utility = rate_utility(spec, pess, sort, plan.scan_and_order_required);
        plan.exact_key_match = plan.utility > Utility::Disallowed
            && exact_key_match(spec, pess, predicate, sort);
        plan.key_fields_only = projection.is_some_and(|p| covered_by_index(spec, p));

        let (start_key, start_inclusive, end_key, end_inclusive) =
            derive_bounds(spec, pess, plan.direction);
        plan.start_key = start_key;
        plan.start_inclusive = start_inclusive;
        plan.end_key = end_key;
        plan.end_inclusive = end_inclusive;

        tracing::trace!(
            index = %spec.name,
            utility = plan.utility.as_str(),
            direction = plan.direction,
            "rated candidate plan"
        );
        plan
    }

    fn for_special(
        ordinal: usize,
        spec: &IndexSpec,
        kind: String,
        frsp: &FieldRangeSetPair,
        sort: &SortKey,
    ) -> Self {
        // Special access paths are opaque: no key bounds, never optimal.
        let utility = if frsp.match_impossible() {
            Utility::Impossible
        } else {
            Utility::Helpful
        };
        Self {
            access: AccessPath::Special { ordinal, kind },
            index_key: spec.key_json(),
            direction: 1,
            start_key: vec![],
            start_inclusive: true,
            end_key: vec![],
            end_inclusive: true,
            utility,
            scan_and_order_required: !sort.is_empty(),
            exact_key_match: false,
            key_fields_only: false,
            finite_set_order_suffix: false,
            finite_prefix: vec![],
        }
    }

    pub fn access(&self) -> &AccessPath {
        &self.access
    }

    /// Catalog ordinal of the scanned index, if any.
    pub fn index_ordinal(&self) -> Option<usize> {
        match &self.access {
            AccessPath::CollectionScan => None,
            AccessPath::Btree { ordinal } | AccessPath::Special { ordinal, .. } => Some(*ordinal),
        }
    }

    /// The index key pattern, `{"$natural": ±1}` for a collection scan.
    pub fn index_key(&self) -> &Value {
        &self.index_key
    }

    /// Special access kind, if this is a special plan.
    pub fn special(&self) -> Option<&str> {
        match &self.access {
            AccessPath::Special { kind, .. } => Some(kind),
            _ => None,
        }
    }

    pub fn is_collection_scan(&self) -> bool {
        matches!(self.access, AccessPath::CollectionScan)
    }

    pub fn utility(&self) -> Utility {
        self.utility
    }

    /// +1 / -1 for an index-order scan, 0 when a post-sort is required.
    pub fn direction(&self) -> i32 {
        self.direction
    }

    pub fn scan_and_order_required(&self) -> bool {
        self.scan_and_order_required
    }

    /// True when this plan delivers documents in the requested order (an
    /// empty sort is trivially in order).
    pub fn serves_sort_in_order(&self) -> bool {
        !self.scan_and_order_required
    }

    /// The index alone proves a match; the residual matcher is skipped.
    pub fn exact_key_match(&self) -> bool {
        self.exact_key_match
    }

    /// The requested projection is coverable from the index key.
    pub fn key_fields_only(&self) -> bool {
        self.key_fields_only
    }

    pub fn query_finite_set_order_suffix(&self) -> bool {
        self.finite_set_order_suffix
    }

    /// Points per finite-prefix field (ascending) for sub-scan enumeration.
    pub fn finite_prefix(&self) -> &[Vec<KeyValue>] {
        &self.finite_prefix
    }

    pub fn start_key(&self) -> &CompositeKey {
        &self.start_key
    }

    pub fn start_inclusive(&self) -> bool {
        self.start_inclusive
    }

    pub fn end_key(&self) -> &CompositeKey {
        &self.end_key
    }

    pub fn end_inclusive(&self) -> bool {
        self.end_inclusive
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "plan {} dir {:+} utility {}",
            self.index_key,
            self.direction,
            self.utility.as_str()
        )?;
        if !self.start_key.is_empty() {
            let render = |key: &CompositeKey| {
                key.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(", ")
            };
            write!(f, " bounds [{}] .. [{}]", render(&self.start_key), render(&self.end_key))?;
        }
        if self.scan_and_order_required {
            write!(f, " scanAndOrder")?;
        }
        if self.exact_key_match {
            write!(f, " exactKeyMatch")?;
        }
        if self.finite_set_order_suffix {
            write!(f, " finiteSetOrderSuffix")?;
        }
        Ok(())
    }
}

/// Direction making the index deliver the requested order, if any.
///
/// Walks sort fields against the key pattern; key fields constrained to a
/// single point may be skipped. All matched fields must agree on one
/// relative direction.
fn sort_direction_on_index(
    spec: &IndexSpec,
    pess: &crate::ranges::FieldRangeSet,
    sort: &SortKey,
) -> Option<i32> {
    let mut d = 0i32;
    let mut key_iter = spec.key.iter();
    for (order_field, order_dir) in &sort.fields {
        loop {
            let (key_field, key_dir) = key_iter.next()?;
            if key_field == order_field {
                let rel = if order_dir.as_i32() == key_dir.as_i32() { 1 } else { -1 };
                if d == 0 {
                    d = rel;
                } else if d != rel {
                    return None;
                }
                break;
            }
            // Only equality-constrained key fields may sit between sort
            // fields.
            if !pess.range(key_field).is_point() {
                return None;
            }
        }
    }
    Some(if d == 0 { 1 } else { d })
}

/// Score the plan per the precedence ladder (Impossible and Disallowed are
/// checked by the caller).
fn rate_utility(
    spec: &IndexSpec,
    pess: &crate::ranges::FieldRangeSet,
    sort: &SortKey,
    scan_and_order_required: bool,
) -> Utility {
    // Optimal: walking the key pattern, a run of equalities, then at most
    // one non-point constrained field, then nothing constrained; and the
    // walk accounts for every constrained field of the query.
    let mut optimal_count: i64 = 0;
    let mut awaiting_last = true;
    for (field, _) in &spec.key {
        let range = pess.range(field);
        if awaiting_last {
            if !range.is_universal() {
                optimal_count += 1;
            }
            if !range.is_point() {
                awaiting_last = false;
            }
        } else if !range.is_universal() {
            optimal_count = -1;
        }
    }
    if !scan_and_order_required && optimal_count == pess.num_non_universal() as i64 {
        return Utility::Optimal;
    }

    // An index whose leading field is unconstrained cannot bound the scan;
    // unless it serves the sort it is useless.
    let leading_universal = spec
        .key
        .first()
        .is_some_and(|(field, _)| pess.range(field).is_universal());
    if leading_universal && (sort.is_empty() || scan_and_order_required) {
        return Utility::Unhelpful;
    }
    Utility::Helpful
}

/// Whether index keys alone prove document equality for this query.
///
/// Every key field must carry a single equality on an exactly-representable
/// type (strings and booleans; numbers are excluded because numeric type
/// coercion makes their key encoding non-injective), the predicate must
/// reference exactly the key fields, and the sort must stay within them.
fn exact_key_match(
    spec: &IndexSpec,
    pess: &crate::ranges::FieldRangeSet,
    predicate: &Predicate,
    sort: &SortKey,
) -> bool {
    predicate.or_branches.is_empty()
        && predicate.nor_branches.is_empty()
        && spec.key.iter().all(|(field, _)| pess.exact_equality(field))
        && predicate.field_names().len() == spec.arity()
        && sort
            .fields
            .iter()
            .all(|(field, _)| spec.key.iter().any(|(k, _)| k == field))
}

/// Whether an inclusion projection is satisfiable from the index key alone.
fn covered_by_index(spec: &IndexSpec, projection: &Projection) -> bool {
    projection.inclusive
        && !spec.multikey
        && spec.covers_fields(projection.fields.iter().map(String::as_str))
        && (!projection.include_id || spec.covers_fields(std::iter::once("_id")))
}

/// Detect the finite-prefix / order-suffix shape.
///
/// Returns `(flag, direction, per-field points)`.
fn finite_set_order_suffix(
    spec: &IndexSpec,
    pess: &crate::ranges::FieldRangeSet,
    sort: &SortKey,
) -> (bool, i32, Vec<Vec<KeyValue>>) {
    let mut prefix_points: Vec<Vec<KeyValue>> = Vec::new();
    for (field, _) in &spec.key {
        match pess.range(field).finite_points() {
            Some(points) => prefix_points.push(points.into_iter().cloned().collect()),
            None => break,
        }
    }
    let prefix_len = prefix_points.len();

    // Every constrained field of the query must sit inside the finite
    // prefix, else index order cannot stand in for the sort.
    let in_prefix = |field: &str| {
        spec.key[..prefix_len].iter().any(|(k, _)| k == field)
    };
    if pess.constrained_fields().any(|f| !in_prefix(f)) {
        return (false, 0, vec![]);
    }
    if sort.is_empty() {
        return (true, 1, prefix_points);
    }

    // The sort must be a contiguous run of key fields starting at or inside
    // the prefix, with one uniform relative direction.
    let Some(start) = spec.key.iter().position(|(k, _)| k == &sort.fields[0].0) else {
        return (false, 0, vec![]);
    };
    if start > prefix_len {
        return (false, 0, vec![]);
    }
    let mut flip = 0i32;
    for (i, (order_field, order_dir)) in sort.fields.iter().enumerate() {
        let Some((key_field, key_dir)) = spec.key.get(start + i) else {
            return (false, 0, vec![]);
        };
        if key_field != order_field {
            return (false, 0, vec![]);
        }
        let rel = order_dir.as_i32() * key_dir.as_i32();
        if flip == 0 {
            flip = rel;
        } else if flip != rel {
            return (false, 0, vec![]);
        }
    }
    (true, if flip == 0 { 1 } else { flip }, prefix_points)
}

/// Project the range set into composite start/end keys along the key
/// pattern, padding unconstrained positions with `MinKey`/`MaxKey` and
/// flipping per-slot for descending fields and reverse scans.
fn derive_bounds(
    spec: &IndexSpec,
    pess: &crate::ranges::FieldRangeSet,
    direction: i32,
) -> (CompositeKey, bool, CompositeKey, bool) {
    let effective = if direction < 0 { -1 } else { 1 };
    let mut start = Vec::with_capacity(spec.arity());
    let mut end = Vec::with_capacity(spec.arity());
    let mut start_inclusive = true;
    let mut end_inclusive = true;
    for (field, key_dir) in &spec.key {
        let range = pess.range(field);
        let (min, min_inc) = range.min_bound();
        let (max, max_inc) = range.max_bound();
        if key_dir.as_i32() * effective >= 0 {
            start.push(min);
            start_inclusive &= min_inc;
            end.push(max);
            end_inclusive &= max_inc;
        } else {
            start.push(max);
            start_inclusive &= max_inc;
            end.push(min);
            end_inclusive &= min_inc;
        }
    }
    (start, start_inclusive, end, end_inclusive)
}
