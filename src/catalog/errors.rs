//! Index catalog errors.

use thiserror::Error;

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors raised by index catalog maintenance
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// Collections carry a small fixed cap of indexes
    #[error("Index limit of {0} reached for this collection")]
    IndexLimitReached(usize),

    /// Index names are unique per collection
    #[error("Index '{0}' already exists")]
    DuplicateIndex(String),

    /// Named index does not exist
    #[error("Unknown index '{0}'")]
    UnknownIndex(String),

    /// Key patterns map field names to ±1 or a special kind string
    #[error("Invalid index key pattern: {0}")]
    InvalidKeyPattern(String),
}

impl CatalogError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::IndexLimitReached(_) => "QUILL_CATALOG_INDEX_LIMIT",
            CatalogError::DuplicateIndex(_) => "QUILL_CATALOG_DUPLICATE_INDEX",
            CatalogError::UnknownIndex(_) => "QUILL_CATALOG_UNKNOWN_INDEX",
            CatalogError::InvalidKeyPattern(_) => "QUILL_CATALOG_INVALID_KEY_PATTERN",
        }
    }
}
