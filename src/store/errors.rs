//! Store errors.

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the in-memory collection store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// `_id` values are unique per collection
    #[error("Duplicate _id: {0}")]
    DuplicateId(String),

    /// Documents are JSON objects
    #[error("Document must be an object")]
    NotAnObject,
}

impl StoreError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::DuplicateId(_) => "QUILL_STORE_DUPLICATE_ID",
            StoreError::NotAnObject => "QUILL_STORE_NOT_AN_OBJECT",
        }
    }
}
