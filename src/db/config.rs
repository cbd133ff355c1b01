//! Planner configuration.

use serde::Deserialize;

use crate::catalog::DEFAULT_INDEX_LIMIT;
use crate::scan::ScanTuning;

/// Tuning knobs for planning and racing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerConfig {
    /// Matching documents a plan must stream to win a race outright
    pub race_decision_threshold: usize,
    /// A cached plan scanning more than `factor * recorded + factor`
    /// documents is evicted and the query replanned
    pub cache_invalidation_factor: u64,
    /// Per-collection index cap
    pub max_indexes: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            race_decision_threshold: 101,
            cache_invalidation_factor: 10,
            max_indexes: DEFAULT_INDEX_LIMIT,
        }
    }
}

impl PlannerConfig {
    pub fn tuning(&self) -> ScanTuning {
        ScanTuning {
            race_decision_threshold: self.race_decision_threshold,
            cache_invalidation_factor: self.cache_invalidation_factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlannerConfig::default();
        assert_eq!(config.race_decision_threshold, 101);
        assert_eq!(config.cache_invalidation_factor, 10);
        assert_eq!(config.max_indexes, 10);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: PlannerConfig =
            serde_json::from_str(r#"{"cache_invalidation_factor": 4}"#).unwrap();
        assert_eq!(config.cache_invalidation_factor, 4);
        assert_eq!(config.race_decision_threshold, 101);

        assert!(serde_json::from_str::<PlannerConfig>(r#"{"bogus": 1}"#).is_err());
    }
}
