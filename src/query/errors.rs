//! Query parsing errors.
//!
//! All of these are caller mistakes: malformed predicate documents, invalid
//! sort or projection specifications. They reject the request and never
//! affect engine state.

use thiserror::Error;

/// Result type for query parsing
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while parsing query documents
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// Operator is not part of the supported dialect
    #[error("Unknown query operator '{0}'")]
    UnknownOperator(String),

    /// Operator applied to an operand of the wrong shape
    #[error("Invalid operand for '{operator}' on field '{field}': {reason}")]
    InvalidOperand {
        operator: String,
        field: String,
        reason: String,
    },

    /// `$or` / `$nor` / `$and` must be non-empty arrays of objects
    #[error("'{0}' requires a non-empty array of predicate objects")]
    InvalidBranchList(String),

    /// Sort documents map field names to +1 / -1
    #[error("Invalid sort specification: {0}")]
    InvalidSort(String),

    /// Projection documents are all-inclusion or all-exclusion (except _id)
    #[error("Invalid projection: {0}")]
    InvalidProjection(String),
}

impl QueryError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::UnknownOperator(_) => "QUILL_QUERY_UNKNOWN_OPERATOR",
            QueryError::InvalidOperand { .. } => "QUILL_QUERY_INVALID_OPERAND",
            QueryError::InvalidBranchList(_) => "QUILL_QUERY_INVALID_BRANCH_LIST",
            QueryError::InvalidSort(_) => "QUILL_QUERY_INVALID_SORT",
            QueryError::InvalidProjection(_) => "QUILL_QUERY_INVALID_PROJECTION",
        }
    }
}
