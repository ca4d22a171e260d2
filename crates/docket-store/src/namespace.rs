use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Prefix reserved for server-owned collections
pub const SYSTEM_PREFIX: &str = "system.";

/// Fully-qualified collection name: `<db>.<collection>`
///
/// The collection part may itself contain dots (`test.system.profile`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    db: String,
    collection: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Result<Self, StoreError> {
        let db = db.into();
        let collection = collection.into();
        if db.is_empty() || db.contains('.') || collection.is_empty() {
            return Err(StoreError::InvalidNamespace(format!("{}.{}", db, collection)));
        }
        if collection.starts_with('.') || collection.ends_with('.') || collection.contains("..") {
            return Err(StoreError::InvalidNamespace(format!("{}.{}", db, collection)));
        }
        Ok(Self { db, collection })
    }

    /// Parse `db.collection`
    pub fn parse(full: &str) -> Result<Self, StoreError> {
        let (db, collection) = full
            .split_once('.')
            .ok_or_else(|| StoreError::InvalidNamespace(full.to_string()))?;
        Self::new(db, collection)
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_system(&self) -> bool {
        self.collection.starts_with(SYSTEM_PREFIX)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_collection() {
        let ns = Namespace::parse("test.system.profile").unwrap();
        assert_eq!(ns.db(), "test");
        assert_eq!(ns.collection(), "system.profile");
        assert!(ns.is_system());
        assert_eq!(ns.to_string(), "test.system.profile");
    }

    #[test]
    fn test_system_prefix_needs_a_dot() {
        let ns = Namespace::parse("test.system").unwrap();
        assert!(!ns.is_system());
        assert!(Namespace::parse("test.systemic").map(|ns| !ns.is_system()).unwrap());
    }

    #[test]
    fn test_invalid_namespaces() {
        assert!(Namespace::parse("nodot").is_err());
        assert!(Namespace::parse("test.").is_err());
        assert!(Namespace::parse(".coll").is_err());
        assert!(Namespace::parse("test.a..b").is_err());
    }
}
