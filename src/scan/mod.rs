//! Plan execution.
//!
//! Cursors over single plans, the multi-plan racing scanner, the $or
//! decomposition, and the non-racing best-guess entry point. The storage
//! collaborator stays behind the `StorageAccess` trait.

mod best_guess;
mod cursor;
mod errors;
mod multi_plan;

pub use best_guess::best_guess_cursor;
pub use cursor::{
    compare_by_sort, CancellationFlag, MaterializedCursor, PlanCursor, QueryCursor, ScanOptions,
    StorageAccess,
};
pub use errors::{ScanError, ScanResult};
pub use multi_plan::{MultiPlanScanner, ScanTuning};
