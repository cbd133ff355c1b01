//! Top-level error type.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::plan::PlanError;
use crate::query::QueryError;
use crate::scan::ScanError;
use crate::store::StoreError;

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;

/// Errors surfaced by the database facade
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DbError {
    /// Named collection does not exist
    #[error("Namespace '{0}' not found")]
    NamespaceNotFound(String),

    /// Query document rejected
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Index catalog rejected the operation
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Plan construction rejected the query (hints, special rules)
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Execution failed or was interrupted
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Store rejected a write
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DbError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            DbError::NamespaceNotFound(_) => "QUILL_DB_NAMESPACE_NOT_FOUND",
            DbError::Query(e) => e.code(),
            DbError::Catalog(e) => e.code(),
            DbError::Plan(e) => e.code(),
            DbError::Scan(e) => e.code(),
            DbError::Store(e) => e.code(),
        }
    }
}
