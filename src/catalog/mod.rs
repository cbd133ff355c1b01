//! Index catalog.
//!
//! A read-only view (from the planner's perspective) of the indexes defined
//! on a collection. Schema changes happen under the collection handle, which
//! also clears the plan cache.

#[allow(clippy::module_inception)]
mod catalog;
mod errors;
mod spec;

pub use catalog::{IndexCatalog, DEFAULT_INDEX_LIMIT};
pub use errors::{CatalogError, CatalogResult};
pub use spec::IndexSpec;
