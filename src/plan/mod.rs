//! Plan construction and enumeration.
//!
//! `QueryPlan` represents one candidate access path with its derived bounds
//! and score; `QueryPlanSet` enumerates and orders the candidates for one
//! query, applying hint, special-index, cached-plan and fallback rules.

mod errors;
mod plan_set;
mod query_plan;

pub use errors::{PlanError, PlanResult};
pub use plan_set::{
    CandidatePlanCharacter, PlanSetRequest, QueryPlanSet, RecordedPlanPolicy,
};
pub use query_plan::{AccessPath, QueryPlan, Utility};
