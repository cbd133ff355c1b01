//! Plan cache.
//!
//! Per-collection mapping from query pattern (shape of predicate + sort) to
//! the last winning plan. In-memory only; cleared whenever an index is
//! created or dropped or the collection goes away. Entries are overwritten
//! on each successful race, so there is no TTL.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use serde_json::Value;

use crate::plan::{CandidatePlanCharacter, QueryPlan, Utility};
use crate::ranges::QueryPattern;

/// The remembered outcome of a plan race.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedQueryPlan {
    /// Winning index key pattern (`{"$natural": ±1}` for a collection scan)
    pub index_key: Value,
    /// Documents the winner scanned when it was recorded
    pub n_scanned: u64,
    /// What kinds of plans the candidate set contained
    pub character: CandidatePlanCharacter,
}

impl CachedQueryPlan {
    pub fn new(index_key: Value, n_scanned: u64, character: CandidatePlanCharacter) -> Self {
        Self {
            index_key,
            n_scanned,
            character,
        }
    }
}

impl fmt::Display for CachedQueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nScanned {} {}",
            self.index_key, self.n_scanned, self.character
        )
    }
}

/// One collection's plan memoization, guarded by a plain mutex.
#[derive(Debug, Default)]
pub struct PlanCache {
    entries: Mutex<HashMap<QueryPattern, CachedQueryPlan>>,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the cached winner for a pattern.
    pub fn lookup(&self, pattern: &QueryPattern) -> Option<CachedQueryPlan> {
        self.entries
            .lock()
            .expect("plan cache mutex poisoned")
            .get(pattern)
            .cloned()
    }

    /// Record a cache entry directly.
    pub fn record(&self, pattern: QueryPattern, cached: CachedQueryPlan) {
        tracing::debug!(pattern = %pattern, entry = %cached, "plan cache record");
        self.entries
            .lock()
            .expect("plan cache mutex poisoned")
            .insert(pattern, cached);
    }

    /// Record a race winner. Plans rated `Impossible` or `Disallowed` are
    /// never cached.
    pub fn record_winner(
        &self,
        pattern: QueryPattern,
        plan: &QueryPlan,
        n_scanned: u64,
        character: CandidatePlanCharacter,
    ) {
        if matches!(plan.utility(), Utility::Impossible | Utility::Disallowed) {
            return;
        }
        self.record(
            pattern,
            CachedQueryPlan::new(plan.index_key().clone(), n_scanned, character),
        );
    }

    /// Drop one entry (adaptive fallback after a cached plan underperforms).
    pub fn invalidate(&self, pattern: &QueryPattern) {
        tracing::warn!(pattern = %pattern, "plan cache invalidate");
        self.entries
            .lock()
            .expect("plan cache mutex poisoned")
            .remove(pattern);
    }

    /// Drop everything. Called on index create/drop and collection drop.
    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("plan cache mutex poisoned")
            .clear();
    }

    /// Number of cached patterns.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("plan cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
