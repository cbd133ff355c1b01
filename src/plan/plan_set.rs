//! Candidate plan enumeration.
//!
//! A `QueryPlanSet` holds the ordered candidates for one (predicate, sort,
//! hint) tuple. Selection rules, in order: an explicit hint wins alone; a
//! geospatial predicate takes the matching special index alone; a usable
//! cached winner short-circuits enumeration; a first `Optimal` plan wins
//! alone and is recorded; otherwise every `Helpful` btree plan plus a
//! collection-scan fallback race. Special plans never race against viable
//! btree plans.

use std::fmt;

use serde_json::Value;

use crate::cache::{CachedQueryPlan, PlanCache};
use crate::catalog::IndexCatalog;
use crate::query::{Predicate, Projection, SortKey};
use crate::ranges::{FieldRangeSetPair, QueryPattern};

use super::errors::{PlanError, PlanResult};
use super::query_plan::{QueryPlan, Utility};

/// Whether to honor a previously recorded plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedPlanPolicy {
    Use,
    Ignore,
}

/// Two bits describing a candidate set: whether it may contain a plan
/// delivering the requested order, and one that does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidatePlanCharacter {
    may_run_in_order: bool,
    may_run_out_of_order: bool,
}

impl CandidatePlanCharacter {
    pub fn new(may_run_in_order: bool, may_run_out_of_order: bool) -> Self {
        Self {
            may_run_in_order,
            may_run_out_of_order,
        }
    }

    pub fn of_plans(plans: &[QueryPlan]) -> Self {
        Self {
            may_run_in_order: plans.iter().any(QueryPlan::serves_sort_in_order),
            may_run_out_of_order: plans.iter().any(QueryPlan::scan_and_order_required),
        }
    }

    pub fn may_run_in_order_plan(&self) -> bool {
        self.may_run_in_order
    }

    pub fn may_run_out_of_order_plan(&self) -> bool {
        self.may_run_out_of_order
    }
}

impl fmt::Display for CandidatePlanCharacter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(inOrder: {}, outOfOrder: {})",
            self.may_run_in_order, self.may_run_out_of_order
        )
    }
}

/// Inputs for plan set construction.
#[derive(Clone, Copy)]
pub struct PlanSetRequest<'a> {
    pub catalog: &'a IndexCatalog,
    pub frsp: &'a FieldRangeSetPair,
    pub predicate: &'a Predicate,
    pub sort: &'a SortKey,
    pub projection: Option<&'a Projection>,
    pub hint: Option<&'a Value>,
    pub allow_special: bool,
    pub policy: RecordedPlanPolicy,
    pub cache: &'a PlanCache,
}

/// The ordered candidate plans for one query.
#[derive(Debug, Clone)]
pub struct QueryPlanSet {
    plans: Vec<QueryPlan>,
    pattern: QueryPattern,
    character: CandidatePlanCharacter,
    using_cached_plan: bool,
    has_possibly_excluded_plans: bool,
    recorded_n_scanned: Option<u64>,
}

impl QueryPlanSet {
    /// Enumerate candidate plans.
    pub fn build(req: PlanSetRequest<'_>) -> PlanResult<Self> {
        let pattern = req.frsp.pattern(req.sort);

        // A $natural sort forces the collection scan outright.
        if let Some((_, dir)) = req
            .sort
            .fields
            .iter()
            .find(|(field, _)| field == "$natural")
        {
            let plan =
                QueryPlan::collection_scan(req.frsp, &SortKey::none(), dir.as_i32());
            return Ok(Self::single(plan, pattern, false));
        }

        if let Some(hint) = req.hint {
            let plan = Self::resolve_hint(&req, hint)?;
            return Ok(Self::single(plan, pattern, false));
        }

        // A geospatial predicate requires the matching special index.
        if let Some(kind) = req.frsp.special() {
            if !req.allow_special {
                return Err(PlanError::SpecialNotAllowed);
            }
            let (ordinal, spec) = req
                .catalog
                .indexes()
                .iter()
                .enumerate()
                .find(|(_, s)| s.special.as_deref() == Some(kind))
                .ok_or_else(|| PlanError::NoSpecialIndex(kind.to_string()))?;
            let plan = QueryPlan::for_index(
                ordinal,
                spec,
                req.frsp,
                req.predicate,
                req.sort,
                req.projection,
            );
            return Ok(Self::single(plan, pattern, false));
        }

        if req.policy == RecordedPlanPolicy::Use {
            if let Some(set) = Self::try_cached(&req, &pattern) {
                return Ok(set);
            }
        }

        Ok(Self::enumerate(&req, pattern))
    }

    fn single(plan: QueryPlan, pattern: QueryPattern, using_cached: bool) -> Self {
        let character = CandidatePlanCharacter::of_plans(std::slice::from_ref(&plan));
        Self {
            plans: vec![plan],
            pattern,
            character,
            using_cached_plan: using_cached,
            has_possibly_excluded_plans: false,
            recorded_n_scanned: None,
        }
    }

    fn resolve_hint(req: &PlanSetRequest<'_>, hint: &Value) -> PlanResult<QueryPlan> {
        let (ordinal, spec) = match hint {
            Value::String(name) => req
                .catalog
                .find_by_name(name)
                .ok_or_else(|| PlanError::UnknownIndexName(name.clone()))?,
            Value::Object(map) => {
                if let Some(dir) = map.get("$natural") {
                    let direction = dir.as_i64().unwrap_or(1) as i32;
                    return Ok(QueryPlan::collection_scan(req.frsp, req.sort, direction));
                }
                req.catalog
                    .find_by_key(hint)
                    .ok_or_else(|| PlanError::UnknownIndexKey(hint.to_string()))?
            }
            other => return Err(PlanError::BadHint(other.to_string())),
        };
        if spec.special.is_some() && !req.allow_special {
            return Err(PlanError::SpecialNotAllowed);
        }
        Ok(QueryPlan::for_index(
            ordinal,
            spec,
            req.frsp,
            req.predicate,
            req.sort,
            req.projection,
        ))
    }

    /// Try to reuse the cached winner for this pattern. Returns `None` when
    /// the entry is missing or unusable under the current predicate.
    fn try_cached(req: &PlanSetRequest<'_>, pattern: &QueryPattern) -> Option<QueryPlanSet> {
        let entry = req.cache.lookup(pattern)?;

        let plan = if entry.index_key.get("$natural").is_some() {
            QueryPlan::collection_scan(req.frsp, req.sort, 1)
        } else {
            let (ordinal, spec) = req.catalog.find_by_key(&entry.index_key)?;
            if spec.special.is_some() && !req.allow_special {
                return None;
            }
            QueryPlan::for_index(
                ordinal,
                spec,
                req.frsp,
                req.predicate,
                req.sort,
                req.projection,
            )
        };

        // A recorded plan that is unhelpful or forbidden under the current
        // predicate is ignored rather than replayed.
        if plan.utility() <= Utility::Unhelpful {
            tracing::debug!(
                pattern = %pattern,
                utility = plan.utility().as_str(),
                "ignoring unusable cached plan"
            );
            return None;
        }

        tracing::debug!(pattern = %pattern, index = %plan.index_key(), "using cached plan");
        let has_possibly_excluded =
            entry.character.may_run_in_order_plan() && entry.character.may_run_out_of_order_plan();
        Some(QueryPlanSet {
            plans: vec![plan],
            pattern: pattern.clone(),
            character: entry.character,
            using_cached_plan: true,
            has_possibly_excluded_plans: has_possibly_excluded,
            recorded_n_scanned: Some(entry.n_scanned),
        })
    }

    fn enumerate(req: &PlanSetRequest<'_>, pattern: QueryPattern) -> QueryPlanSet {
        let mut helpful: Vec<QueryPlan> = Vec::new();
        let mut optimal: Option<QueryPlan> = None;
        let mut special_plan: Option<QueryPlan> = None;

        for (ordinal, spec) in req.catalog.indexes().iter().enumerate() {
            let plan = QueryPlan::for_index(
                ordinal,
                spec,
                req.frsp,
                req.predicate,
                req.sort,
                req.projection,
            );
            match plan.utility() {
                // No document can match: the single impossible plan stands
                // for the whole set.
                Utility::Impossible => return Self::single(plan, pattern, false),
                Utility::Optimal => {
                    if optimal.is_none() {
                        optimal = Some(plan);
                    }
                }
                Utility::Helpful => {
                    if plan.special().is_some() {
                        if req.allow_special && special_plan.is_none() {
                            special_plan = Some(plan);
                        }
                    } else {
                        helpful.push(plan);
                    }
                }
                Utility::Unhelpful | Utility::Disallowed => {}
            }
        }

        // The first optimal plan wins alone and is remembered immediately.
        if let Some(plan) = optimal {
            let set = Self::single(plan, pattern.clone(), false);
            req.cache.record(
                pattern,
                CachedQueryPlan::new(
                    set.plans[0].index_key().clone(),
                    0,
                    set.character,
                ),
            );
            return set;
        }

        // A special plan only stands when no btree plan survived.
        if helpful.is_empty() {
            if let Some(plan) = special_plan {
                return Self::single(plan, pattern, false);
            }
        }

        // Otherwise every helpful plan races, with the collection scan as
        // the fallback candidate.
        let mut plans = helpful;
        plans.push(QueryPlan::collection_scan(req.frsp, req.sort, 1));
        let character = CandidatePlanCharacter::of_plans(&plans);
        QueryPlanSet {
            plans,
            pattern,
            character,
            using_cached_plan: false,
            has_possibly_excluded_plans: false,
            recorded_n_scanned: None,
        }
    }

    /// Number of candidate plans.
    pub fn n_plans(&self) -> usize {
        self.plans.len()
    }

    /// The first (preferred) plan.
    pub fn first_plan(&self) -> &QueryPlan {
        &self.plans[0]
    }

    /// All candidates in preference order.
    pub fn plans(&self) -> &[QueryPlan] {
        &self.plans
    }

    /// The cache key for this query's shape.
    pub fn pattern(&self) -> &QueryPattern {
        &self.pattern
    }

    pub fn character(&self) -> CandidatePlanCharacter {
        self.character
    }

    /// Whether an in-order plan may exist for this shape (including plans
    /// excluded by a cached winner).
    pub fn possible_in_order_plan(&self) -> bool {
        self.character.may_run_in_order_plan()
    }

    pub fn possible_out_of_order_plan(&self) -> bool {
        self.character.may_run_out_of_order_plan()
    }

    /// Whether the set actually holds an in-order plan.
    pub fn have_in_order_plan(&self) -> bool {
        self.plans.iter().any(QueryPlan::serves_sort_in_order)
    }

    pub fn has_possibly_excluded_plans(&self) -> bool {
        self.has_possibly_excluded_plans
    }

    pub fn using_cached_plan(&self) -> bool {
        self.using_cached_plan
    }

    /// nScanned recorded with the cached plan, when one is in use.
    pub fn recorded_n_scanned(&self) -> Option<u64> {
        self.recorded_n_scanned
    }
}

impl fmt::Display for QueryPlanSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "plan set ({} plans, cached: {}) {}",
            self.plans.len(),
            self.using_cached_plan,
            self.character
        )?;
        for plan in &self.plans {
            writeln!(f, "  {}", plan)?;
        }
        Ok(())
    }
}
