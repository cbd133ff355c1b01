//! One-shot plan selection.
//!
//! Read paths that cannot afford racing (singleton lookups, internal reads)
//! take the cached winner when one exists, otherwise the first helpful plan
//! in catalog order, preferring a plan that serves the requested sort.
//! Never races, never writes the cache.

use crate::cache::PlanCache;
use crate::catalog::IndexCatalog;
use crate::plan::{QueryPlan, Utility};
use crate::query::{Matcher, Predicate, SortKey};
use crate::ranges::FieldRangeSetPair;

use super::cursor::{PlanCursor, QueryCursor, ScanOptions, StorageAccess};
use super::errors::ScanResult;

/// Pick a single plan heuristically and open it.
pub fn best_guess_cursor<'a, S: StorageAccess>(
    catalog: &'a IndexCatalog,
    store: &'a S,
    cache: &PlanCache,
    predicate: Predicate,
    sort: SortKey,
    options: ScanOptions,
) -> ScanResult<Box<dyn QueryCursor + 'a>> {
    let frsp = FieldRangeSetPair::new(&predicate);
    let matcher = Matcher::new(predicate.clone());

    // Cached winner first, unless it is forbidden under this predicate.
    if options.use_recorded_plan {
        if let Some(entry) = cache.lookup(&frsp.pattern(&sort)) {
            let cached_plan = if entry.index_key.get("$natural").is_some() {
                Some(QueryPlan::collection_scan(&frsp, &sort, 1))
            } else {
                catalog.find_by_key(&entry.index_key).and_then(|(ordinal, spec)| {
                    if spec.special.is_some() && !options.allow_special {
                        return None;
                    }
                    Some(QueryPlan::for_index(
                        ordinal, spec, &frsp, &predicate, &sort, None,
                    ))
                })
            };
            if let Some(plan) = cached_plan {
                if plan.utility() != Utility::Disallowed {
                    tracing::debug!(index = %plan.index_key(), "best guess: cached plan");
                    let cursor = PlanCursor::open(plan, store, Some(matcher), &sort, options)?;
                    return Ok(Box::new(cursor));
                }
            }
        }
    }

    // Heuristic pick in catalog enumeration order.
    let mut plans: Vec<QueryPlan> = Vec::with_capacity(catalog.len());
    for (ordinal, spec) in catalog.indexes().iter().enumerate() {
        if spec.special.is_some() && frsp.special().is_none() {
            continue;
        }
        plans.push(QueryPlan::for_index(
            ordinal, spec, &frsp, &predicate, &sort, None,
        ));
    }

    let in_order_pick = (!sort.is_empty())
        .then(|| {
            plans
                .iter()
                .position(|p| p.utility() >= Utility::Helpful && p.serves_sort_in_order())
        })
        .flatten();
    let any_pick = plans
        .iter()
        .position(|p| p.utility() >= Utility::Helpful);
    let plan = match in_order_pick.or(any_pick) {
        Some(i) => plans.swap_remove(i),
        None => QueryPlan::collection_scan(&frsp, &sort, 1),
    };
    tracing::debug!(index = %plan.index_key(), "best guess pick");
    let cursor = PlanCursor::open(plan, store, Some(matcher), &sort, options)?;
    Ok(Box::new(cursor))
}
