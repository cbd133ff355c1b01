//! quilldb — the query planner core of a document-oriented database.
//!
//! Given a declarative predicate, an optional sort, an optional hint and
//! the indexes on a collection, the planner decides which access paths to
//! evaluate and how: per-field range analysis (`ranges`), candidate plan
//! construction and scoring (`plan`), simultaneous plan racing (`scan`),
//! and shape-keyed memoization of winners (`cache`). The `db` module wires
//! the pieces to an in-memory store for end-to-end use.

pub mod cache;
pub mod catalog;
pub mod db;
pub mod key;
pub mod plan;
pub mod query;
pub mod ranges;
pub mod scan;
pub mod store;

pub use db::{Database, DbError, DbResult, FindOptions, PlannerConfig};
pub use scan::{CancellationFlag, QueryCursor, ScanOptions};
