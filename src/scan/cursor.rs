//! Cursor machinery.
//!
//! `StorageAccess` is the seam to the storage collaborator: it materializes
//! document id lists for bounded index scans and natural-order collection
//! scans, and fetches documents by id. `PlanCursor` drives one plan's scan
//! position by position; wrappers add post-sorting and emptiness.
//!
//! Cursor contract: `advance()` moves the scan one position; `current()` is
//! the document at the position; `current_matches()` says whether it
//! satisfies the predicate. Cursors that materialize (post-sorted output)
//! yield matches only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::key::{CompositeKey, KeyValue};
use crate::plan::{AccessPath, QueryPlan, RecordedPlanPolicy};
use crate::query::{Matcher, SortDirection, SortKey};

use super::errors::{ScanError, ScanResult};

/// Cooperative cancellation handle, polled at each cursor advance and each
/// racing tick.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-query execution options.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Permit special (non-btree) plans
    pub allow_special: bool,
    /// Honor or ignore the plan cache
    pub use_recorded_plan: bool,
    /// Absolute deadline; expiry behaves like cancellation
    pub deadline: Option<Instant>,
    /// Cooperative cancellation
    pub cancel: Option<CancellationFlag>,
}

impl ScanOptions {
    /// Defaults: special plans allowed, recorded plans honored.
    pub fn new() -> Self {
        Self {
            allow_special: true,
            use_recorded_plan: true,
            deadline: None,
            cancel: None,
        }
    }

    pub fn policy(&self) -> RecordedPlanPolicy {
        if self.use_recorded_plan {
            RecordedPlanPolicy::Use
        } else {
            RecordedPlanPolicy::Ignore
        }
    }

    /// Poll cancellation and deadline.
    pub fn check_interrupt(&self) -> ScanResult<()> {
        if self.cancel.as_ref().is_some_and(CancellationFlag::is_cancelled) {
            return Err(ScanError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ScanError::DeadlineExceeded);
        }
        Ok(())
    }
}

/// Storage collaborator seam.
///
/// Implementations materialize id lists in scan order; documents are
/// fetched individually so cursors stay valid across yields.
pub trait StorageAccess {
    /// Document ids in natural order (+1) or reverse (-1).
    fn collection_scan_ids(&self, direction: i32) -> Vec<KeyValue>;

    /// Document ids for one index between composite bounds, in index order
    /// for `direction` +1 or reversed for -1.
    fn index_scan_ids(
        &self,
        ordinal: usize,
        start: &CompositeKey,
        start_inclusive: bool,
        end: &CompositeKey,
        end_inclusive: bool,
        direction: i32,
    ) -> Vec<KeyValue>;

    /// Fetch a document by id.
    fn fetch(&self, id: &KeyValue) -> Option<Value>;
}

/// The cursor interface handed to callers.
pub trait QueryCursor: std::fmt::Debug {
    /// True while positioned on a document.
    fn ok(&self) -> bool;

    /// The current document.
    fn current(&self) -> Option<&Value>;

    /// Move one position; returns `ok()` at the new position.
    fn advance(&mut self) -> ScanResult<bool>;

    /// Whether the current document satisfies the predicate.
    fn current_matches(&self) -> bool;

    /// Key pattern of the access path (`{"$natural": ±1}` for scans).
    fn index_key_pattern(&self) -> Value;

    /// The residual matcher, absent when the index key alone proves
    /// matches.
    fn matcher(&self) -> Option<&Matcher>;

    /// Documents examined so far.
    fn n_scanned(&self) -> u64;
}

/// Compare two documents by a sort key.
pub fn compare_by_sort(a: &Value, b: &Value, sort: &SortKey) -> std::cmp::Ordering {
    for (field, direction) in &sort.fields {
        let ka = a.get(field).map(KeyValue::from_json).unwrap_or(KeyValue::Null);
        let kb = b.get(field).map(KeyValue::from_json).unwrap_or(KeyValue::Null);
        let ord = match direction {
            SortDirection::Asc => ka.cmp(&kb),
            SortDirection::Desc => kb.cmp(&ka),
        };
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    std::cmp::Ordering::Equal
}

/// Materialize the id list one plan will walk.
///
/// For a finite-set order-suffix plan with a sort and more than one prefix
/// combination, per-combination sub-scans are merged on the sort key so the
/// cursor streams in the requested order without a post-sort.
pub fn ids_for_plan<S: StorageAccess>(
    plan: &QueryPlan,
    store: &S,
    sort: &SortKey,
) -> Vec<KeyValue> {
    match plan.access() {
        AccessPath::CollectionScan => store.collection_scan_ids(plan.direction()),
        // The special access path is opaque here; walk the collection and
        // let the residual matcher filter.
        AccessPath::Special { .. } => store.collection_scan_ids(1),
        AccessPath::Btree { ordinal } => {
            let combinations = combination_count(plan.finite_prefix());
            if plan.query_finite_set_order_suffix() && !sort.is_empty() && combinations > 1 {
                merge_finite_sub_scans(plan, *ordinal, store, sort)
            } else {
                store.index_scan_ids(
                    *ordinal,
                    plan.start_key(),
                    plan.start_inclusive(),
                    plan.end_key(),
                    plan.end_inclusive(),
                    plan.direction(),
                )
            }
        }
    }
}

fn combination_count(prefix: &[Vec<KeyValue>]) -> usize {
    if prefix.is_empty() {
        return 0;
    }
    prefix.iter().map(Vec::len).product()
}

/// Scan each Cartesian combination of the finite prefix and merge the
/// streams on the sort key.
fn merge_finite_sub_scans<S: StorageAccess>(
    plan: &QueryPlan,
    ordinal: usize,
    store: &S,
    sort: &SortKey,
) -> Vec<KeyValue> {
    let arity = plan.start_key().len();
    let prefix = plan.finite_prefix();
    let mut lists: Vec<Vec<KeyValue>> = Vec::new();
    let mut combination: Vec<usize> = vec![0; prefix.len()];
    loop {
        // Bounds for this combination: chosen points, then the plan's own
        // padding for trailing slots.
        let mut start: CompositeKey = Vec::with_capacity(arity);
        let mut end: CompositeKey = Vec::with_capacity(arity);
        for (slot, &choice) in combination.iter().enumerate() {
            let point = prefix[slot][choice].clone();
            start.push(point.clone());
            end.push(point);
        }
        for slot in prefix.len()..arity {
            start.push(plan.start_key()[slot].clone());
            end.push(plan.end_key()[slot].clone());
        }
        lists.push(store.index_scan_ids(
            ordinal,
            &start,
            true,
            &end,
            true,
            plan.direction(),
        ));

        // Next combination.
        let mut slot = prefix.len();
        loop {
            if slot == 0 {
                return k_way_merge(lists, store, sort);
            }
            slot -= 1;
            combination[slot] += 1;
            if combination[slot] < prefix[slot].len() {
                break;
            }
            combination[slot] = 0;
        }
    }
}

fn k_way_merge<S: StorageAccess>(
    lists: Vec<Vec<KeyValue>>,
    store: &S,
    sort: &SortKey,
) -> Vec<KeyValue> {
    let mut positions = vec![0usize; lists.len()];
    let total: usize = lists.iter().map(Vec::len).sum();
    let mut merged = Vec::with_capacity(total);
    while merged.len() < total {
        let mut best: Option<(usize, Value)> = None;
        for (i, list) in lists.iter().enumerate() {
            let Some(id) = list.get(positions[i]) else {
                continue;
            };
            let Some(doc) = store.fetch(id) else {
                positions[i] += 1;
                continue;
            };
            let better = match &best {
                None => true,
                Some((_, best_doc)) => {
                    compare_by_sort(&doc, best_doc, sort) == std::cmp::Ordering::Less
                }
            };
            if better {
                best = Some((i, doc));
            }
        }
        match best {
            Some((i, _)) => {
                merged.push(lists[i][positions[i]].clone());
                positions[i] += 1;
            }
            None => break,
        }
    }
    merged
}

/// A cursor walking one plan's scan positions.
pub struct PlanCursor<'a, S: StorageAccess> {
    store: &'a S,
    plan: QueryPlan,
    ids: Vec<KeyValue>,
    /// Position of the current document; None before the first advance.
    pos: Option<usize>,
    current: Option<Value>,
    matcher: Option<Matcher>,
    options: ScanOptions,
    n_scanned: u64,
}

impl<'a, S: StorageAccess> PlanCursor<'a, S> {
    /// Build a cursor positioned on the first document (if any).
    pub fn open(
        plan: QueryPlan,
        store: &'a S,
        matcher: Option<Matcher>,
        sort: &SortKey,
        options: ScanOptions,
    ) -> ScanResult<Self> {
        let mut ids = if plan.utility() == crate::plan::Utility::Impossible {
            vec![]
        } else {
            ids_for_plan(&plan, store, sort)
        };
        // A multikey index can list one document under several keys in the
        // same bounds; each document is visited once, at its first key.
        if ids.len() > 1 {
            let mut seen = std::collections::BTreeSet::new();
            ids.retain(|id| seen.insert(id.clone()));
        }
        // Plans whose index keys prove matches carry no matcher.
        let matcher = if plan.exact_key_match() { None } else { matcher };
        let mut cursor = Self {
            store,
            plan,
            ids,
            pos: None,
            current: None,
            matcher,
            options,
            n_scanned: 0,
        };
        cursor.advance()?;
        Ok(cursor)
    }

    /// The plan this cursor executes.
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }
}

impl<S: StorageAccess> std::fmt::Debug for PlanCursor<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanCursor")
            .field("plan", &self.plan)
            .field("pos", &self.pos)
            .field("matcher", &self.matcher)
            .field("options", &self.options)
            .field("n_scanned", &self.n_scanned)
            .finish()
    }
}

impl<S: StorageAccess> QueryCursor for PlanCursor<'_, S> {
    fn ok(&self) -> bool {
        self.current.is_some()
    }

    fn current(&self) -> Option<&Value> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> ScanResult<bool> {
        self.options.check_interrupt()?;
        let next = match self.pos {
            None => 0,
            Some(p) => p + 1,
        };
        loop {
            let Some(id) = self.ids.get(next) else {
                // Skip over ids whose documents vanished without burning a
                // position per missing id.
                self.pos = Some(next);
                self.current = None;
                return Ok(false);
            };
            match self.store.fetch(id) {
                Some(doc) => {
                    self.pos = Some(next);
                    self.current = Some(doc);
                    self.n_scanned += 1;
                    return Ok(true);
                }
                None => {
                    // Document removed underneath the id list.
                    self.ids.remove(next);
                }
            }
        }
    }

    fn current_matches(&self) -> bool {
        match (&self.current, &self.matcher) {
            (Some(doc), Some(matcher)) => matcher.matches(doc),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn index_key_pattern(&self) -> Value {
        self.plan.index_key().clone()
    }

    fn matcher(&self) -> Option<&Matcher> {
        self.matcher.as_ref()
    }

    fn n_scanned(&self) -> u64 {
        self.n_scanned
    }
}

/// A cursor over an already-collected, ordered batch of matches.
#[derive(Debug)]
pub struct MaterializedCursor {
    docs: Vec<Value>,
    pos: Option<usize>,
    index_key: Value,
    matcher: Option<Matcher>,
    n_scanned: u64,
}

impl MaterializedCursor {
    pub fn new(docs: Vec<Value>, index_key: Value, matcher: Option<Matcher>, n_scanned: u64) -> Self {
        let pos = if docs.is_empty() { None } else { Some(0) };
        Self {
            docs,
            pos,
            index_key,
            matcher,
            n_scanned,
        }
    }

    /// The empty cursor (e.g. for a missing namespace).
    pub fn empty() -> Self {
        Self::new(vec![], serde_json::json!({ "$natural": 1 }), None, 0)
    }
}

impl QueryCursor for MaterializedCursor {
    fn ok(&self) -> bool {
        self.pos.is_some_and(|p| p < self.docs.len())
    }

    fn current(&self) -> Option<&Value> {
        self.pos.and_then(|p| self.docs.get(p))
    }

    fn advance(&mut self) -> ScanResult<bool> {
        self.pos = Some(self.pos.map_or(0, |p| p + 1));
        Ok(self.ok())
    }

    fn current_matches(&self) -> bool {
        // Materialized cursors hold matches only.
        self.ok()
    }

    fn index_key_pattern(&self) -> Value {
        self.index_key.clone()
    }

    fn matcher(&self) -> Option<&Matcher> {
        self.matcher.as_ref()
    }

    fn n_scanned(&self) -> u64 {
        self.n_scanned
    }
}
