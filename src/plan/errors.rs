//! Plan construction errors.
//!
//! All of these are user errors per the error model: malformed or
//! unresolvable hints, and geospatial operators when special plans are not
//! allowed. They propagate to the caller unchanged.

use thiserror::Error;

/// Result type for plan construction
pub type PlanResult<T> = Result<T, PlanError>;

/// Errors raised while constructing a plan set
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    /// Hint was not a name, key pattern or `$natural` document
    #[error("Bad hint: {0}")]
    BadHint(String),

    /// Hinted index name does not exist
    #[error("Hint specifies unknown index name '{0}'")]
    UnknownIndexName(String),

    /// Hinted key pattern matches no index
    #[error("Hint specifies unknown index key {0}")]
    UnknownIndexKey(String),

    /// Geospatial operator or special hint while special plans are disabled
    #[error("Special index plans are not allowed for this operation")]
    SpecialNotAllowed,

    /// Geospatial operator with no matching special index
    #[error("Unable to find a special index for '{0}' query")]
    NoSpecialIndex(String),
}

impl PlanError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::BadHint(_) => "QUILL_PLAN_BAD_HINT",
            PlanError::UnknownIndexName(_) => "QUILL_PLAN_UNKNOWN_INDEX_NAME",
            PlanError::UnknownIndexKey(_) => "QUILL_PLAN_UNKNOWN_INDEX_KEY",
            PlanError::SpecialNotAllowed => "QUILL_PLAN_SPECIAL_NOT_ALLOWED",
            PlanError::NoSpecialIndex(_) => "QUILL_PLAN_NO_SPECIAL_INDEX",
        }
    }
}
