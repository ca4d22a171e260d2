//! docket-store: in-memory document collections
//!
//! The evaluator and profiler sit on top of a document store. This crate is
//! the smallest store that lets them do real work:
//! - `Store`: catalog of collections keyed by [`Namespace`]
//! - `query`: filter, sort (`$natural` included), skip and limit
//! - `mutation`: `$set`/`$unset`/`$inc` updates and replacements
//! - capped collections that rotate their oldest documents out
//!
//! There is no persistence and there are no indexes; every find is a scan.

mod collection;
mod error;
mod filter;
mod mutation;
mod namespace;
pub mod query;
mod store;
mod value;

pub use collection::Collection;
pub use error::StoreError;
pub use filter::{Condition, Filter};
pub use mutation::{MutationResult, UpdateOp, UpdateSpec};
pub use namespace::{Namespace, SYSTEM_PREFIX};
pub use query::{FindRequest, FindResult, SortKey};
pub use store::Store;
pub use value::{compare_values, get_path, values_equal};

/// A stored document: a JSON object whose field order is preserved
pub type Document = serde_json::Map<String, serde_json::Value>;
