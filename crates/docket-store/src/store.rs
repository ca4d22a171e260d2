use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use crate::collection::Collection;
use crate::error::StoreError;
use crate::filter::Filter;
use crate::mutation::{MutationResult, UpdateSpec};
use crate::namespace::Namespace;
use crate::query::{self, FindRequest, FindResult};
use crate::Document;

type SharedCollection = Arc<RwLock<Collection>>;

/// In-memory catalog of collections
///
/// The catalog lock is only held long enough to look up or create a
/// collection; each collection has its own lock, so operations on different
/// namespaces never contend.
#[derive(Debug, Default)]
pub struct Store {
    collections: RwLock<BTreeMap<Namespace, SharedCollection>>,
    next_id: AtomicU64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, ns: &Namespace) -> Option<SharedCollection> {
        self.collections.read().get(ns).cloned()
    }

    fn get_or_create(&self, ns: &Namespace) -> SharedCollection {
        if let Some(coll) = self.get(ns) {
            return coll;
        }
        let mut catalog = self.collections.write();
        catalog
            .entry(ns.clone())
            .or_insert_with(|| {
                debug!(ns = %ns, "store.collection.created");
                Arc::new(RwLock::new(Collection::new(ns.to_string(), None)))
            })
            .clone()
    }

    /// Create a capped collection, or resize an existing capped one.
    ///
    /// Fails with `NotCapped` when a regular collection already has the name.
    pub fn create_capped(&self, ns: &Namespace, capacity: usize) -> Result<(), StoreError> {
        let mut catalog = self.collections.write();
        if let Some(existing) = catalog.get(ns) {
            let mut existing = existing.write();
            if !existing.is_capped() {
                return Err(StoreError::NotCapped(ns.to_string()));
            }
            if existing.capacity() != Some(capacity) {
                let mut resized = Collection::new(ns.to_string(), Some(capacity));
                for doc in existing.iter() {
                    resized.push(doc.clone());
                }
                *existing = resized;
            }
            return Ok(());
        }
        debug!(ns = %ns, capacity, "store.collection.created_capped");
        catalog.insert(
            ns.clone(),
            Arc::new(RwLock::new(Collection::new(ns.to_string(), Some(capacity)))),
        );
        Ok(())
    }

    pub fn exists(&self, ns: &Namespace) -> bool {
        self.collections.read().contains_key(ns)
    }

    pub fn is_capped(&self, ns: &Namespace) -> bool {
        self.get(ns).is_some_and(|c| c.read().is_capped())
    }

    /// Collection names of one database, sorted
    pub fn collection_names(&self, db: &str) -> Vec<String> {
        self.collections
            .read()
            .keys()
            .filter(|ns| ns.db() == db)
            .map(|ns| ns.collection().to_string())
            .collect()
    }

    /// Insert a document, assigning `_id` when absent. Returns the `_id`.
    pub fn insert(&self, ns: &Namespace, doc: Value) -> Result<Value, StoreError> {
        let doc = self.prepare(doc)?;
        let id = doc.get("_id").cloned().unwrap_or(Value::Null);
        self.get_or_create(ns).write().push(doc);
        Ok(id)
    }

    /// Append to an existing capped collection.
    ///
    /// Unlike [`Store::insert`] this never creates the collection and refuses
    /// regular collections, so a log cannot silently grow without bound.
    pub fn append_capped(&self, ns: &Namespace, doc: Value) -> Result<(), StoreError> {
        let coll = self
            .get(ns)
            .ok_or_else(|| StoreError::Unavailable(ns.to_string()))?;
        let mut coll = coll.write();
        if !coll.is_capped() {
            return Err(StoreError::NotCapped(ns.to_string()));
        }
        let doc = self.prepare(doc)?;
        coll.push(doc);
        Ok(())
    }

    fn prepare(&self, doc: Value) -> Result<Document, StoreError> {
        let fields = match doc {
            Value::Object(fields) => fields,
            other => return Err(StoreError::InvalidDocument(type_name(&other).into())),
        };
        if fields.contains_key("_id") {
            return Ok(fields);
        }
        // `_id` goes first, like every stored document
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut out = Map::with_capacity(fields.len() + 1);
        out.insert("_id".into(), Value::from(id));
        out.extend(fields);
        Ok(out)
    }

    pub fn find(&self, ns: &Namespace, request: &FindRequest) -> Result<FindResult, StoreError> {
        match self.get(ns) {
            Some(coll) => query::execute(&coll.read(), request),
            None => {
                // Validate the request even when there is nothing to scan
                Filter::parse(&request.filter)?;
                if let Some(sort) = &request.sort {
                    query::parse_sort(sort)?;
                }
                Ok(FindResult::default())
            }
        }
    }

    pub fn find_one(&self, ns: &Namespace, filter: Value) -> Result<Option<Document>, StoreError> {
        let result = self.find(ns, &FindRequest::one(filter))?;
        Ok(result.documents.into_iter().next())
    }

    pub fn count(&self, ns: &Namespace, filter: &Value) -> Result<usize, StoreError> {
        let filter = Filter::parse(filter)?;
        Ok(self
            .get(ns)
            .map(|c| c.read().iter().filter(|d| filter.matches(d)).count())
            .unwrap_or(0))
    }

    pub fn update(
        &self,
        ns: &Namespace,
        filter: &Value,
        update: &Value,
        multi: bool,
    ) -> Result<MutationResult, StoreError> {
        let filter = Filter::parse(filter)?;
        let spec = UpdateSpec::parse(update)?;
        let Some(coll) = self.get(ns) else {
            return Ok(MutationResult::default());
        };
        let mut coll = coll.write();
        let mut result = MutationResult::default();
        for doc in coll.iter_mut() {
            if !filter.matches(doc) {
                continue;
            }
            result.matched += 1;
            if spec.apply(doc)? {
                result.modified += 1;
            }
            if !multi {
                break;
            }
        }
        Ok(result)
    }

    pub fn remove(&self, ns: &Namespace, filter: &Value) -> Result<usize, StoreError> {
        let filter = Filter::parse(filter)?;
        let Some(coll) = self.get(ns) else {
            return Ok(0);
        };
        let removed = coll.write().retain(|d| !filter.matches(d));
        Ok(removed)
    }

    /// Drop a collection; returns whether it existed
    pub fn drop_collection(&self, ns: &Namespace) -> bool {
        let dropped = self.collections.write().remove(ns).is_some();
        if dropped {
            debug!(ns = %ns, "store.collection.dropped");
        }
        dropped
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
