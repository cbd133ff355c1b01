//! Multi-plan racing.
//!
//! With one candidate the scanner passes through. With several, all plans
//! advance round-robin, one step per plan per tick; the first plan to
//! exhaust its bounds wins, or the first to stream a threshold of matching
//! documents. The winner's plan is re-opened as the caller's cursor and the
//! outcome is recorded in the plan cache.
//!
//! A top-level `$or` runs as sequential sub-scans, one per clause, each
//! planned and raced independently, with already-emitted `_id`s suppressed
//! across clauses.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;

use crate::cache::PlanCache;
use crate::catalog::IndexCatalog;
use crate::key::KeyValue;
use crate::plan::{PlanResult, PlanSetRequest, QueryPlan, QueryPlanSet};
use crate::query::{Matcher, Predicate, Projection, SortKey};
use crate::ranges::{FieldRangeSetPair, QueryPattern};

use super::cursor::{MaterializedCursor, PlanCursor, QueryCursor, ScanOptions, StorageAccess};
use super::errors::{ScanError, ScanResult};

/// Scanner tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct ScanTuning {
    /// Matches a plan must stream to win a race outright
    pub race_decision_threshold: usize,
    /// A cached plan scanning more than `factor * recorded + factor`
    /// documents is evicted and the query replanned
    pub cache_invalidation_factor: u64,
}

impl Default for ScanTuning {
    fn default() -> Self {
        Self {
            race_decision_threshold: 101,
            cache_invalidation_factor: 10,
        }
    }
}

/// Orchestrates candidate racing for one query on one collection.
pub struct MultiPlanScanner<'a, S: StorageAccess> {
    catalog: &'a IndexCatalog,
    store: &'a S,
    cache: &'a PlanCache,
    predicate: Predicate,
    sort: SortKey,
    projection: Option<Projection>,
    options: ScanOptions,
    tuning: ScanTuning,
    /// Plan set for the whole query, or for the first `$or` clause.
    plan_set: QueryPlanSet,
    /// Remaining `$or` clause predicates (whole-clause conjunctions).
    or_clauses: Option<Vec<Predicate>>,
}

impl<'a, S: StorageAccess> MultiPlanScanner<'a, S> {
    /// Plan a query, decomposing a top-level `$or` into clause sub-scans.
    #[allow(clippy::too_many_arguments)]
    pub fn make(
        catalog: &'a IndexCatalog,
        store: &'a S,
        cache: &'a PlanCache,
        predicate: Predicate,
        sort: SortKey,
        projection: Option<Projection>,
        hint: Option<Value>,
        options: ScanOptions,
        tuning: ScanTuning,
    ) -> PlanResult<Self> {
        let or_clauses = if hint.is_none() && !predicate.or_branches.is_empty() {
            // Each clause is the branch AND the top-level conjuncts.
            let clauses: Vec<Predicate> = predicate
                .or_branches
                .iter()
                .map(|branch| {
                    let mut clause = branch.clone();
                    clause.clauses.extend(predicate.clauses.iter().cloned());
                    clause
                })
                .collect();
            Some(clauses)
        } else {
            None
        };

        let plan_set = match &or_clauses {
            // Clause sub-scans are planned sortless; order cannot survive
            // concatenation.
            Some(clauses) => build_plan_set(
                catalog,
                cache,
                &clauses[0],
                &SortKey::none(),
                projection.as_ref(),
                None,
                &options,
            )?,
            None => build_plan_set(
                catalog,
                cache,
                &predicate,
                &sort,
                projection.as_ref(),
                hint.as_ref(),
                &options,
            )?,
        };

        Ok(Self {
            catalog,
            store,
            cache,
            predicate,
            sort,
            projection,
            options,
            tuning,
            plan_set,
            or_clauses,
        })
    }

    /// Candidate count for the current (first) plan set.
    pub fn current_n_plans(&self) -> usize {
        self.plan_set.n_plans()
    }

    pub fn possible_in_order_plan(&self) -> bool {
        if self.or_clauses.is_some() && !self.sort.is_empty() {
            return false;
        }
        self.plan_set.possible_in_order_plan()
    }

    pub fn possible_out_of_order_plan(&self) -> bool {
        if self.or_clauses.is_some() && !self.sort.is_empty() {
            return true;
        }
        self.plan_set.possible_out_of_order_plan()
    }

    pub fn have_in_order_plan(&self) -> bool {
        if self.or_clauses.is_some() && !self.sort.is_empty() {
            return false;
        }
        self.plan_set.have_in_order_plan()
    }

    pub fn has_possibly_excluded_plans(&self) -> bool {
        self.plan_set.has_possibly_excluded_plans()
    }

    pub fn using_cached_plan(&self) -> bool {
        self.plan_set.using_cached_plan()
    }

    /// Race the candidates and hand back the winner as a cursor.
    pub fn cursor(self) -> ScanResult<Box<dyn QueryCursor + 'a>> {
        if let Some(clauses) = self.or_clauses {
            let or_cursor = OrScanCursor::open(
                self.catalog,
                self.store,
                self.cache,
                clauses,
                self.plan_set,
                self.projection.clone(),
                self.options.clone(),
                self.tuning,
            )?;
            if self.sort.is_empty() {
                return Ok(Box::new(or_cursor));
            }
            // An $or delivers clause order; a requested sort means
            // materializing and ordering the union.
            return materialize_sorted(or_cursor, &self.sort);
        }

        let matcher = Matcher::new(self.predicate.clone());
        if self.plan_set.n_plans() == 1 {
            let plan = self.plan_set.first_plan().clone();
            let cursor = open_winner(
                plan,
                self.store,
                Some(matcher),
                &self.sort,
                self.options.clone(),
            )?;
            if self.plan_set.using_cached_plan() {
                // Watch a replayed plan for underperformance.
                let recorded = self.plan_set.recorded_n_scanned().unwrap_or(0);
                return Ok(Box::new(AdaptiveCursor {
                    inner: cursor,
                    catalog: self.catalog,
                    store: self.store,
                    cache: self.cache,
                    predicate: self.predicate,
                    sort: self.sort,
                    projection: self.projection,
                    options: self.options,
                    tuning: self.tuning,
                    pattern: self.plan_set.pattern().clone(),
                    recorded,
                    emitted: BTreeSet::new(),
                    retried: false,
                }));
            }
            return Ok(cursor);
        }

        let (winner, n_scanned) = race(
            &self.plan_set,
            &self.predicate,
            &self.sort,
            self.store,
            &self.options,
            &self.tuning,
        )?;
        let plan = self.plan_set.plans()[winner].clone();
        tracing::debug!(
            index = %plan.index_key(),
            n_scanned,
            "race decided"
        );
        self.cache.record_winner(
            self.plan_set.pattern().clone(),
            &plan,
            n_scanned,
            self.plan_set.character(),
        );
        open_winner(plan, self.store, Some(matcher), &self.sort, self.options)
    }
}

impl<S: StorageAccess> fmt::Display for MultiPlanScanner<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(clauses) = &self.or_clauses {
            writeln!(f, "multi plan scanner ({} $or clauses)", clauses.len())?;
        } else {
            writeln!(f, "multi plan scanner")?;
        }
        write!(f, "{}", self.plan_set)
    }
}

/// Build a plan set for one predicate against one collection.
pub(crate) fn build_plan_set(
    catalog: &IndexCatalog,
    cache: &PlanCache,
    predicate: &Predicate,
    sort: &SortKey,
    projection: Option<&Projection>,
    hint: Option<&Value>,
    options: &ScanOptions,
) -> PlanResult<QueryPlanSet> {
    let frsp = FieldRangeSetPair::new(predicate);
    QueryPlanSet::build(PlanSetRequest {
        catalog,
        frsp: &frsp,
        predicate,
        sort,
        projection,
        hint,
        allow_special: options.allow_special,
        policy: options.policy(),
        cache,
    })
}

/// Round-robin race. Returns the winning plan's position in the set and the
/// documents it had scanned at the decision point.
fn race<S: StorageAccess>(
    plan_set: &QueryPlanSet,
    predicate: &Predicate,
    sort: &SortKey,
    store: &S,
    options: &ScanOptions,
    tuning: &ScanTuning,
) -> ScanResult<(usize, u64)> {
    let matcher = Matcher::new(predicate.clone());
    let mut candidates: Vec<Option<PlanCursor<'_, S>>> = Vec::with_capacity(plan_set.n_plans());
    for plan in plan_set.plans() {
        match PlanCursor::open(
            plan.clone(),
            store,
            Some(matcher.clone()),
            sort,
            options.clone(),
        ) {
            Ok(cursor) => candidates.push(Some(cursor)),
            Err(e) if e.is_terminal() => return Err(e),
            Err(_) => candidates.push(None),
        }
    }

    let mut matches = vec![0usize; candidates.len()];
    loop {
        options.check_interrupt()?;
        let mut alive = 0usize;
        let mut last_error: Option<ScanError> = None;
        for i in 0..candidates.len() {
            let Some(cursor) = candidates[i].as_mut() else {
                continue;
            };
            alive += 1;

            // Win by exhaustion: the whole result is in hand.
            if !cursor.ok() {
                return Ok((i, cursor.n_scanned()));
            }

            // Win by streaming enough matches in order.
            if cursor.current_matches() && !cursor.plan().scan_and_order_required() {
                matches[i] += 1;
                if matches[i] >= tuning.race_decision_threshold {
                    return Ok((i, cursor.n_scanned()));
                }
            }

            match cursor.advance() {
                Ok(_) => {}
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    // One failing plan drops out; the race goes on.
                    last_error = Some(e);
                    candidates[i] = None;
                    alive -= 1;
                }
            }
        }
        if alive == 0 {
            return Err(ScanError::AllPlansFailed(
                last_error.map(|e| e.to_string()).unwrap_or_else(|| {
                    "no candidate plan could be opened".to_string()
                }),
            ));
        }
    }
}

/// Open the definitive cursor for a decided plan.
///
/// Plans needing a post-sort are drained and materialized in order; all
/// others stream positions directly.
fn open_winner<'a, S: StorageAccess>(
    plan: QueryPlan,
    store: &'a S,
    matcher: Option<Matcher>,
    sort: &SortKey,
    options: ScanOptions,
) -> ScanResult<Box<dyn QueryCursor + 'a>> {
    let needs_post_sort = plan.scan_and_order_required() && !sort.is_empty();
    let mut cursor = PlanCursor::open(plan, store, matcher, sort, options)?;
    if !needs_post_sort {
        return Ok(Box::new(cursor));
    }

    let index_key = cursor.index_key_pattern();
    let mut docs = Vec::new();
    while cursor.ok() {
        if cursor.current_matches() {
            if let Some(doc) = cursor.current() {
                docs.push(doc.clone());
            }
        }
        cursor.advance()?;
    }
    docs.sort_by(|a, b| super::cursor::compare_by_sort(a, b, sort));
    Ok(Box::new(MaterializedCursor::new(
        docs,
        index_key,
        None,
        cursor.n_scanned(),
    )))
}

/// Drain any cursor, sort its matches, and serve them materialized.
fn materialize_sorted<'a>(
    mut cursor: impl QueryCursor + 'a,
    sort: &SortKey,
) -> ScanResult<Box<dyn QueryCursor + 'a>> {
    let index_key = cursor.index_key_pattern();
    let mut docs = Vec::new();
    while cursor.ok() {
        if cursor.current_matches() {
            if let Some(doc) = cursor.current() {
                docs.push(doc.clone());
            }
        }
        cursor.advance()?;
    }
    docs.sort_by(|a, b| super::cursor::compare_by_sort(a, b, sort));
    Ok(Box::new(MaterializedCursor::new(
        docs,
        index_key,
        None,
        cursor.n_scanned(),
    )))
}

/// Sequential `$or` clause execution with duplicate suppression.
struct OrScanCursor<'a, S: StorageAccess> {
    catalog: &'a IndexCatalog,
    store: &'a S,
    cache: &'a PlanCache,
    clauses: Vec<Predicate>,
    clause_idx: usize,
    inner: Box<dyn QueryCursor + 'a>,
    projection: Option<Projection>,
    options: ScanOptions,
    tuning: ScanTuning,
    /// `_id`s already surfaced by earlier clauses.
    seen: BTreeSet<KeyValue>,
    n_scanned_done: u64,
}

impl<S: StorageAccess> std::fmt::Debug for OrScanCursor<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrScanCursor")
            .field("clause_idx", &self.clause_idx)
            .field("n_scanned_done", &self.n_scanned_done)
            .finish()
    }
}

impl<'a, S: StorageAccess> OrScanCursor<'a, S> {
    #[allow(clippy::too_many_arguments)]
    fn open(
        catalog: &'a IndexCatalog,
        store: &'a S,
        cache: &'a PlanCache,
        clauses: Vec<Predicate>,
        first_set: QueryPlanSet,
        projection: Option<Projection>,
        options: ScanOptions,
        tuning: ScanTuning,
    ) -> ScanResult<Self> {
        let inner = run_clause(store, cache, &clauses[0], first_set, &options, &tuning)?;
        let mut cursor = Self {
            catalog,
            store,
            cache,
            clauses,
            clause_idx: 0,
            inner,
            projection,
            options,
            tuning,
            seen: BTreeSet::new(),
            n_scanned_done: 0,
        };
        cursor.settle()?;
        Ok(cursor)
    }

    /// Move past duplicate matches and exhausted clauses.
    fn settle(&mut self) -> ScanResult<()> {
        loop {
            if self.inner.ok() {
                if self.inner.current_matches() {
                    match current_doc_id(self.inner.as_ref()) {
                        Some(id) if self.seen.contains(&id) => {
                            self.inner.advance()?;
                            continue;
                        }
                        Some(id) => {
                            self.seen.insert(id);
                            return Ok(());
                        }
                        None => return Ok(()),
                    }
                }
                return Ok(());
            }
            // Current clause exhausted; plan and race the next one.
            if self.clause_idx + 1 >= self.clauses.len() {
                return Ok(());
            }
            self.n_scanned_done += self.inner.n_scanned();
            self.clause_idx += 1;
            let clause = &self.clauses[self.clause_idx];
            let set = build_plan_set(
                self.catalog,
                self.cache,
                clause,
                &SortKey::none(),
                self.projection.as_ref(),
                None,
                &self.options,
            )
            .map_err(|e| ScanError::Internal(e.to_string()))?;
            self.inner = run_clause(self.store, self.cache, clause, set, &self.options, &self.tuning)?;
        }
    }
}

/// Race one `$or` clause's plan set and return its winner cursor.
fn run_clause<'a, S: StorageAccess>(
    store: &'a S,
    cache: &PlanCache,
    clause: &Predicate,
    set: QueryPlanSet,
    options: &ScanOptions,
    tuning: &ScanTuning,
) -> ScanResult<Box<dyn QueryCursor + 'a>> {
    let matcher = Matcher::new(clause.clone());
    let sort = SortKey::none();
    if set.n_plans() == 1 {
        return open_winner(
            set.first_plan().clone(),
            store,
            Some(matcher),
            &sort,
            options.clone(),
        );
    }
    let (winner, n_scanned) = race(&set, clause, &sort, store, options, tuning)?;
    let plan = set.plans()[winner].clone();
    cache.record_winner(set.pattern().clone(), &plan, n_scanned, set.character());
    open_winner(plan, store, Some(matcher), &sort, options.clone())
}

fn current_doc_id(cursor: &dyn QueryCursor) -> Option<KeyValue> {
    cursor
        .current()
        .and_then(|doc| doc.get("_id"))
        .map(KeyValue::from_json)
}

impl<S: StorageAccess> QueryCursor for OrScanCursor<'_, S> {
    fn ok(&self) -> bool {
        self.inner.ok()
    }

    fn current(&self) -> Option<&Value> {
        self.inner.current()
    }

    fn advance(&mut self) -> ScanResult<bool> {
        self.options.check_interrupt()?;
        self.inner.advance()?;
        self.settle()?;
        Ok(self.ok())
    }

    fn current_matches(&self) -> bool {
        self.inner.current_matches()
    }

    fn index_key_pattern(&self) -> Value {
        self.inner.index_key_pattern()
    }

    fn matcher(&self) -> Option<&Matcher> {
        self.inner.matcher()
    }

    fn n_scanned(&self) -> u64 {
        self.n_scanned_done + self.inner.n_scanned()
    }
}

/// Watches a replayed cached plan and falls back to a fresh race when it
/// scans far past its recorded cost.
struct AdaptiveCursor<'a, S: StorageAccess> {
    inner: Box<dyn QueryCursor + 'a>,
    catalog: &'a IndexCatalog,
    store: &'a S,
    cache: &'a PlanCache,
    predicate: Predicate,
    sort: SortKey,
    projection: Option<Projection>,
    options: ScanOptions,
    tuning: ScanTuning,
    pattern: QueryPattern,
    recorded: u64,
    /// `_id`s of matches already surfaced, suppressed after a replan.
    emitted: BTreeSet<KeyValue>,
    retried: bool,
}

impl<S: StorageAccess> std::fmt::Debug for AdaptiveCursor<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveCursor")
            .field("predicate", &self.predicate)
            .field("sort", &self.sort)
            .field("recorded", &self.recorded)
            .field("retried", &self.retried)
            .finish()
    }
}

impl<S: StorageAccess> AdaptiveCursor<'_, S> {
    fn over_budget(&self) -> bool {
        let factor = self.tuning.cache_invalidation_factor;
        self.inner.n_scanned() > self.recorded * factor + factor
    }

    fn replan(&mut self) -> ScanResult<()> {
        tracing::warn!(
            pattern = %self.pattern,
            recorded = self.recorded,
            scanned = self.inner.n_scanned(),
            "cached plan underperformed; replanning"
        );
        self.cache.invalidate(&self.pattern);
        self.retried = true;

        let mut options = self.options.clone();
        options.use_recorded_plan = false;
        let set = build_plan_set(
            self.catalog,
            self.cache,
            &self.predicate,
            &self.sort,
            self.projection.as_ref(),
            None,
            &options,
        )
        .map_err(|e| ScanError::Internal(e.to_string()))?;
        let matcher = Matcher::new(self.predicate.clone());
        let cursor = if set.n_plans() == 1 {
            open_winner(
                set.first_plan().clone(),
                self.store,
                Some(matcher),
                &self.sort,
                options,
            )?
        } else {
            let (winner, n_scanned) =
                race(&set, &self.predicate, &self.sort, self.store, &options, &self.tuning)?;
            let plan = set.plans()[winner].clone();
            self.cache
                .record_winner(self.pattern.clone(), &plan, n_scanned, set.character());
            open_winner(plan, self.store, Some(matcher), &self.sort, options)?
        };
        self.inner = cursor;

        // Skip matches the caller has already seen.
        while self.inner.ok() {
            if self.inner.current_matches() {
                match current_doc_id(self.inner.as_ref()) {
                    Some(id) if self.emitted.contains(&id) => {}
                    _ => break,
                }
            } else {
                break;
            }
            self.inner.advance()?;
        }
        Ok(())
    }

    fn note_emitted(&mut self) {
        if self.inner.ok() && self.inner.current_matches() {
            if let Some(id) = current_doc_id(self.inner.as_ref()) {
                self.emitted.insert(id);
            }
        }
    }
}

impl<S: StorageAccess> QueryCursor for AdaptiveCursor<'_, S> {
    fn ok(&self) -> bool {
        self.inner.ok()
    }

    fn current(&self) -> Option<&Value> {
        self.inner.current()
    }

    fn advance(&mut self) -> ScanResult<bool> {
        self.note_emitted();
        self.inner.advance()?;
        if !self.retried && self.over_budget() {
            self.replan()?;
        }
        Ok(self.ok())
    }

    fn current_matches(&self) -> bool {
        self.inner.current_matches()
    }

    fn index_key_pattern(&self) -> Value {
        self.inner.index_key_pattern()
    }

    fn matcher(&self) -> Option<&Matcher> {
        self.inner.matcher()
    }

    fn n_scanned(&self) -> u64 {
        self.inner.n_scanned()
    }
}
