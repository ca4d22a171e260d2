//! Docket: server-side script evaluation and operation profiling over an
//! in-memory document store.
//!
//! Most callers only need [`Database`]:
//!
//! ```
//! use docket::{Database, DbConfig};
//! use serde_json::json;
//!
//! let db = Database::open(DbConfig::default()).unwrap();
//! db.insert("evalb", json!({"x": 3})).unwrap();
//! db.set_profiling_level(2, None).unwrap();
//! let x = db.eval("function() { return db.evalb.findOne().x; }", vec![]).unwrap();
//! assert_eq!(x, json!(3));
//! let newest = &db.profile_log(Some(1)).unwrap()[0];
//! assert!(newest.info.contains("findOne().x"));
//! ```

pub use docket_db::{ConfigError, Database, DbConfig, DbError};
pub use docket_eval::{
    DataAccess, EvalConfig, EvalError, EvalOutcome, EvalRequest, Evaluation, Evaluator,
};
pub use docket_profiler::{
    OpKind, ProfileRecord, ProfileStatus, ProfilingLevel, DEFAULT_SLOW_MS, PROFILE_COLLECTION,
};
pub use docket_store::{Document, FindRequest, FindResult, Namespace, Store};
