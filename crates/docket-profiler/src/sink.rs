use std::sync::Arc;

use docket_store::{Namespace, Store};
use parking_lot::Mutex;

use crate::error::ProfilerError;
use crate::record::ProfileRecord;

/// Collection name of the profile log inside each database
pub const PROFILE_COLLECTION: &str = "system.profile";

/// Destination for profile records
pub trait ProfileSink: Send + Sync {
    fn append(&self, record: &ProfileRecord) -> Result<(), ProfilerError>;
}

/// Writes records into `<db>.system.profile` of a [`Store`].
///
/// The log is a capped collection created on first use. A regular collection
/// squatting on the name makes every append fail with `NotCapped`.
pub struct StoreSink {
    store: Arc<Store>,
    capacity: usize,
}

impl StoreSink {
    pub fn new(store: Arc<Store>, capacity: usize) -> Self {
        Self { store, capacity }
    }

    /// Namespace of the log that receives records for `ns`
    pub fn log_namespace(ns: &str) -> Result<Namespace, ProfilerError> {
        let db = ns.split('.').next().unwrap_or(ns);
        Ok(Namespace::new(db, PROFILE_COLLECTION)?)
    }
}

impl ProfileSink for StoreSink {
    fn append(&self, record: &ProfileRecord) -> Result<(), ProfilerError> {
        let log = Self::log_namespace(&record.ns)?;
        if !self.store.exists(&log) {
            self.store.create_capped(&log, self.capacity)?;
        }
        let doc =
            serde_json::to_value(record).map_err(|e| ProfilerError::Encode(e.to_string()))?;
        self.store.append_capped(&log, doc)?;
        Ok(())
    }
}

/// Keeps records in memory; used by embedders that read the log directly
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<ProfileRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ProfileRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl ProfileSink for MemorySink {
    fn append(&self, record: &ProfileRecord) -> Result<(), ProfilerError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::OpKind;
    use chrono::Utc;
    use docket_store::{FindRequest, StoreError};
    use serde_json::json;

    fn record(ns: &str, seq: u64) -> ProfileRecord {
        ProfileRecord {
            seq,
            ts: Utc::now(),
            micros: 10,
            op: OpKind::Query,
            ns: ns.into(),
            info: format!("query {}", ns),
            nreturned: 0,
            nscanned: 0,
            error: None,
        }
    }

    #[test]
    fn test_store_sink_creates_capped_log() {
        let store = Arc::new(Store::new());
        let sink = StoreSink::new(store.clone(), 2);
        for seq in 1..=3 {
            sink.append(&record("test.evalb", seq)).unwrap();
        }
        let log = Namespace::parse("test.system.profile").unwrap();
        assert!(store.is_capped(&log));
        let docs = store.find(&log, &FindRequest::new()).unwrap().documents;
        let seqs: Vec<_> = docs.iter().map(|d| d["seq"].clone()).collect();
        assert_eq!(seqs, vec![json!(2), json!(3)]);
    }

    #[test]
    fn test_store_sink_routes_by_database() {
        let store = Arc::new(Store::new());
        let sink = StoreSink::new(store.clone(), 10);
        sink.append(&record("alpha.t", 1)).unwrap();
        sink.append(&record("beta.t", 2)).unwrap();
        assert_eq!(store.collection_names("alpha"), vec!["system.profile"]);
        assert_eq!(store.collection_names("beta"), vec!["system.profile"]);
    }

    #[test]
    fn test_store_sink_rejects_uncapped_log() {
        let store = Arc::new(Store::new());
        let log = Namespace::parse("test.system.profile").unwrap();
        store.insert(&log, json!({"squatter": true})).unwrap();
        let sink = StoreSink::new(store, 10);
        let err = sink.append(&record("test.t", 1)).unwrap_err();
        assert_eq!(
            err,
            ProfilerError::Sink(StoreError::NotCapped("test.system.profile".into()))
        );
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.append(&record("test.t", 1)).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].seq, 1);
    }
}
