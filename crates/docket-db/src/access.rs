use docket_eval::{AccessError, DataAccess};
use docket_store::{Document, FindRequest, FindResult, MutationResult, Namespace};
use serde_json::Value;

use crate::database::Database;
use crate::error::DbError;

/// What a script running inside [`Database::eval`] may do.
///
/// Every call goes through the database's public, profiled operations.
/// Reads reach any collection of the database; writes to `system.*` are
/// refused.
pub(crate) struct ScopedAccess<'a> {
    db: &'a Database,
}

impl<'a> ScopedAccess<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    fn writable(&self, op: &'static str, collection: &str) -> Result<(), AccessError> {
        let ns = Namespace::new(self.db.name(), collection).map_err(failed)?;
        if ns.is_system() {
            return Err(AccessError::Unauthorized {
                op,
                ns: ns.to_string(),
            });
        }
        Ok(())
    }
}

fn failed(err: impl Into<DbError>) -> AccessError {
    AccessError::Failed(err.into().to_string())
}

impl DataAccess for ScopedAccess<'_> {
    fn db_name(&self) -> &str {
        self.db.name()
    }

    fn find(&self, collection: &str, request: &FindRequest) -> Result<FindResult, AccessError> {
        self.db.find(collection, request).map_err(failed)
    }

    fn find_one(&self, collection: &str, filter: &Value) -> Result<Option<Document>, AccessError> {
        self.db.find_one(collection, filter).map_err(failed)
    }

    fn count(&self, collection: &str, filter: &Value) -> Result<u64, AccessError> {
        self.db.count(collection, filter).map_err(failed)
    }

    fn insert(&self, collection: &str, doc: Value) -> Result<Value, AccessError> {
        self.writable("insert", collection)?;
        self.db.insert(collection, doc).map_err(failed)
    }

    fn update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        multi: bool,
    ) -> Result<MutationResult, AccessError> {
        self.writable("update", collection)?;
        self.db.update(collection, filter, update, multi).map_err(failed)
    }

    fn remove(&self, collection: &str, filter: &Value) -> Result<u64, AccessError> {
        self.writable("remove", collection)?;
        self.db.remove(collection, filter).map_err(failed)
    }

    fn drop_collection(&self, collection: &str) -> Result<bool, AccessError> {
        self.writable("drop", collection)?;
        self.db.drop_collection(collection).map_err(failed)
    }
}
