//! Scan and execution errors.

use thiserror::Error;

/// Result type for scan operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors raised while driving cursors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    /// Caller cancelled the query; no cache write happens
    #[error("Query cancelled")]
    Cancelled,

    /// Caller-provided deadline expired; treated like cancellation
    #[error("Query deadline exceeded")]
    DeadlineExceeded,

    /// Storage signalled cursor invalidation; the caller should restart
    #[error("Storage invalidated the cursor: {0}")]
    StorageInvalidation(String),

    /// Every candidate plan failed
    #[error("All candidate plans failed: {0}")]
    AllPlansFailed(String),

    /// Invariant violation; fatal for this query
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ScanError::Cancelled => "QUILL_SCAN_CANCELLED",
            ScanError::DeadlineExceeded => "QUILL_SCAN_DEADLINE_EXCEEDED",
            ScanError::StorageInvalidation(_) => "QUILL_SCAN_STORAGE_INVALIDATION",
            ScanError::AllPlansFailed(_) => "QUILL_SCAN_ALL_PLANS_FAILED",
            ScanError::Internal(_) => "QUILL_SCAN_INTERNAL",
        }
    }

    /// True for cancellation-like terminal errors.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanError::Cancelled | ScanError::DeadlineExceeded)
    }
}
