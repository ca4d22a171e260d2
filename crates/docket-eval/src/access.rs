use docket_store::{Document, FindRequest, FindResult, MutationResult};
use serde_json::Value;
use thiserror::Error;

/// Failure reported by a [`DataAccess`] implementation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccessError {
    /// The collection is outside what the script may touch
    #[error("not authorized for {op} on {ns}")]
    Unauthorized { op: &'static str, ns: String },

    #[error("{0}")]
    Failed(String),
}

/// The only door from a script to stored data.
///
/// Collection names are relative to [`DataAccess::db_name`]. Implementations
/// decide which collections a script may read or write and route each call
/// through the same path external callers use.
pub trait DataAccess {
    fn db_name(&self) -> &str;

    fn find(&self, collection: &str, request: &FindRequest) -> Result<FindResult, AccessError>;

    fn find_one(&self, collection: &str, filter: &Value) -> Result<Option<Document>, AccessError>;

    fn count(&self, collection: &str, filter: &Value) -> Result<u64, AccessError>;

    /// Insert a document, returning its `_id`
    fn insert(&self, collection: &str, doc: Value) -> Result<Value, AccessError>;

    fn update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        multi: bool,
    ) -> Result<MutationResult, AccessError>;

    /// Remove matching documents, returning how many were removed
    fn remove(&self, collection: &str, filter: &Value) -> Result<u64, AccessError>;

    fn drop_collection(&self, collection: &str) -> Result<bool, AccessError>;
}
