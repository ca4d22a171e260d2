use std::sync::Arc;

use docket_eval::{EvalConfig, EvalError, EvalRequest, Evaluation, Evaluator};
use docket_profiler::{
    OpKind, OpMeta, ProfileRecord, ProfileSink, ProfileStatus, Profiler, ProfilingLevel, StoreSink,
    PROFILE_COLLECTION,
};
use docket_store::{Document, FindRequest, FindResult, MutationResult, Namespace, Store};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::access::ScopedAccess;
use crate::config::DbConfig;
use crate::error::DbError;

/// One named database: its collections, its profiler and its evaluator.
///
/// Every data operation, including those a script issues from inside
/// [`Database::eval`], goes through the same profiled path.
pub struct Database {
    name: String,
    store: Arc<Store>,
    profiler: Profiler,
    evaluator: Evaluator,
    config: DbConfig,
}

impl Database {
    /// Open a database over a fresh in-memory store
    pub fn open(config: DbConfig) -> Result<Self, DbError> {
        Self::with_store(Arc::new(Store::new()), config)
    }

    /// Open a database over a shared store; profile records go to its `system.profile`
    pub fn with_store(store: Arc<Store>, config: DbConfig) -> Result<Self, DbError> {
        let sink = Arc::new(StoreSink::new(store.clone(), config.profile_capacity));
        Self::with_sink(store, sink, config)
    }

    pub fn with_sink(
        store: Arc<Store>,
        sink: Arc<dyn ProfileSink>,
        config: DbConfig,
    ) -> Result<Self, DbError> {
        config.validate()?;
        let profiler = Profiler::new(sink, config.slow_ms);
        let level = config.initial_level()?;
        if level != ProfilingLevel::Off {
            profiler.set_level(level, None);
        }
        let evaluator = Evaluator::new(EvalConfig::default().with_timeout(config.eval_timeout()));
        Ok(Self {
            name: config.name.clone(),
            store,
            profiler,
            evaluator,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn namespace(&self, collection: &str) -> Result<Namespace, DbError> {
        Ok(Namespace::new(self.name.as_str(), collection)?)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.store.collection_names(&self.name)
    }

    // ===== Profiling =====

    /// Set the profiling level (0, 1 or 2) and optionally the slow threshold.
    /// Returns the state before the call.
    pub fn set_profiling_level(
        &self,
        level: i64,
        slow_ms: Option<u64>,
    ) -> Result<ProfileStatus, DbError> {
        let level = ProfilingLevel::try_from(level)?;
        Ok(self.profiler.set_level(level, slow_ms))
    }

    pub fn profiling_status(&self) -> ProfileStatus {
        self.profiler.status()
    }

    /// Newest profile records first. Reading the log this way is not profiled.
    pub fn profile_log(&self, limit: Option<usize>) -> Result<Vec<ProfileRecord>, DbError> {
        let ns = self.namespace(PROFILE_COLLECTION)?;
        let mut request = FindRequest::new().with_sort(json!({ "$natural": -1 }));
        if let Some(limit) = limit {
            request = request.with_limit(limit);
        }
        self.store
            .find(&ns, &request)?
            .documents
            .into_iter()
            .map(|doc| {
                serde_json::from_value(Value::Object(doc))
                    .map_err(|err| DbError::MalformedRecord(err.to_string()))
            })
            .collect()
    }

    /// Run `run`, then hand its outcome to the profiler
    fn profiled<T>(
        &self,
        kind: OpKind,
        ns: &Namespace,
        info: String,
        run: impl FnOnce() -> Result<(T, u64, u64), DbError>,
    ) -> Result<T, DbError> {
        let op = self.profiler.start();
        let result = run();
        let meta = OpMeta::new(kind, ns.to_string(), info);
        let meta = match &result {
            Ok((_, nreturned, nscanned)) => meta.with_counts(*nreturned, *nscanned),
            Err(err) => meta.with_error(err.to_string()),
        };
        self.profiler.record_if_enabled(op, meta);
        result.map(|(value, _, _)| value)
    }

    // ===== Data operations =====

    pub fn find(&self, collection: &str, request: &FindRequest) -> Result<FindResult, DbError> {
        let ns = self.namespace(collection)?;
        let info = query_info(&ns, request);
        self.profiled(OpKind::Query, &ns, info, || {
            let result = self.store.find(&ns, request)?;
            let nreturned = result.documents.len() as u64;
            let nscanned = result.nscanned as u64;
            Ok((result, nreturned, nscanned))
        })
    }

    pub fn find_one(&self, collection: &str, filter: &Value) -> Result<Option<Document>, DbError> {
        let result = self.find(collection, &FindRequest::one(filter.clone()))?;
        Ok(result.documents.into_iter().next())
    }

    pub fn count(&self, collection: &str, filter: &Value) -> Result<u64, DbError> {
        let ns = self.namespace(collection)?;
        let info = format!("count {} query: {}", ns, filter);
        self.profiled(OpKind::Count, &ns, info, || {
            let n = self.store.count(&ns, filter)? as u64;
            Ok((n, 1, n))
        })
    }

    /// Insert a document; returns its `_id`
    pub fn insert(&self, collection: &str, doc: Value) -> Result<Value, DbError> {
        let ns = self.namespace(collection)?;
        let info = format!("insert {}", ns);
        self.profiled(OpKind::Insert, &ns, info, || {
            let id = self.store.insert(&ns, doc)?;
            Ok((id, 0, 0))
        })
    }

    pub fn update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        multi: bool,
    ) -> Result<MutationResult, DbError> {
        let ns = self.namespace(collection)?;
        let info = format!("update {} query: {} update: {}", ns, filter, update);
        self.profiled(OpKind::Update, &ns, info, || {
            let result = self.store.update(&ns, filter, update, multi)?;
            Ok((result, 0, result.matched as u64))
        })
    }

    /// Remove matching documents; returns how many were removed
    pub fn remove(&self, collection: &str, filter: &Value) -> Result<u64, DbError> {
        let ns = self.namespace(collection)?;
        let info = format!("remove {} query: {}", ns, filter);
        self.profiled(OpKind::Remove, &ns, info, || {
            let n = self.store.remove(&ns, filter)? as u64;
            Ok((n, 0, n))
        })
    }

    /// Drop a collection; returns whether it existed
    pub fn drop_collection(&self, collection: &str) -> Result<bool, DbError> {
        let ns = self.namespace(collection)?;
        let cmd = self.namespace("$cmd")?;
        let info = format!("command {} drop: {}", cmd, ns.collection());
        self.profiled(OpKind::Command, &cmd, info, || {
            Ok((self.store.drop_collection(&ns), 0, 0))
        })
    }

    // ===== Evaluation =====

    /// Evaluate a script and return its value
    pub fn eval(&self, script_body: &str, args: Vec<Value>) -> Result<Value, DbError> {
        let request = EvalRequest::new(script_body).with_args(args);
        Ok(self.eval_request(&request).result?)
    }

    /// Evaluate a script, keeping its printed output.
    ///
    /// The evaluation is profiled as one `eval` operation whose `info`
    /// carries the script source. Operations the script issues are profiled
    /// individually and, completing first, precede it in the log. A script
    /// that does not parse never ran and leaves no record.
    pub fn eval_request(&self, request: &EvalRequest) -> Evaluation {
        let op = self.profiler.start();
        let access = ScopedAccess::new(self);
        let evaluation = self.evaluator.evaluate(&access, request);

        let ns = format!("{}.$cmd", self.name);
        let meta = OpMeta::new(
            OpKind::Eval,
            ns.as_str(),
            format!("eval {} code: {}", ns, request.script_body),
        );
        match &evaluation.result {
            Ok(_) => {
                self.profiler.record_if_enabled(op, meta.with_counts(1, 0));
            }
            Err(EvalError::Parse(_)) => {}
            Err(err) => {
                self.profiler.record_if_enabled(op, meta.with_error(err.to_string()));
            }
        }

        let micros = evaluation.elapsed.as_micros() as u64;
        match &evaluation.result {
            Ok(_) => info!(
                db = %self.name,
                micros,
                logs = evaluation.logs.len(),
                "db.eval.completed"
            ),
            Err(err) => warn!(
                db = %self.name,
                micros,
                kind = err.kind(),
                error = %err,
                "db.eval.failed"
            ),
        }
        evaluation
    }
}

fn query_info(ns: &Namespace, request: &FindRequest) -> String {
    let mut info = format!("query {}", ns);
    if let Some(limit) = request.limit {
        info.push_str(&format!(" ntoreturn:{}", limit));
    }
    if request.skip > 0 {
        info.push_str(&format!(" ntoskip:{}", request.skip));
    }
    info.push_str(&format!(" query: {}", request.filter));
    if let Some(sort) = &request.sort {
        info.push_str(&format!(" orderby: {}", sort));
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_profiler::{MemorySink, ProfilerError};
    use docket_store::StoreError;

    fn open() -> Database {
        Database::open(DbConfig::default()).unwrap()
    }

    struct FailingSink;

    impl ProfileSink for FailingSink {
        fn append(&self, _record: &ProfileRecord) -> Result<(), ProfilerError> {
            Err(ProfilerError::Sink(StoreError::Unavailable("test.system.profile".into())))
        }
    }

    #[test]
    fn test_starts_off_and_records_nothing() {
        let db = open();
        db.insert("t", json!({"a": 1})).unwrap();
        db.find_one("t", &json!({})).unwrap();
        assert_eq!(db.profiling_status().was, ProfilingLevel::Off);
        assert!(db.profile_log(None).unwrap().is_empty());
        assert!(!db.collection_names().contains(&"system.profile".to_string()));
    }

    #[test]
    fn test_level_all_records_each_operation() {
        let db = open();
        db.set_profiling_level(2, None).unwrap();
        db.insert("t", json!({"a": 1})).unwrap();
        db.count("t", &json!({"a": 1})).unwrap();
        db.update("t", &json!({"a": 1}), &json!({"$set": {"b": 2}}), false)
            .unwrap();
        db.find("t", &FindRequest::new().with_filter(json!({"b": 2})).with_limit(5))
            .unwrap();
        db.remove("t", &json!({"a": 1})).unwrap();
        db.drop_collection("t").unwrap();

        let mut log = db.profile_log(None).unwrap();
        log.reverse();
        let infos: Vec<_> = log.iter().map(|r| r.info.as_str()).collect();
        assert_eq!(
            infos,
            vec![
                "insert test.t",
                "count test.t query: {\"a\":1}",
                "update test.t query: {\"a\":1} update: {\"$set\":{\"b\":2}}",
                "query test.t ntoreturn:5 query: {\"b\":2}",
                "remove test.t query: {\"a\":1}",
                "command test.$cmd drop: t",
            ]
        );
        let kinds: Vec<_> = log.iter().map(|r| r.op).collect();
        assert_eq!(
            kinds,
            vec![
                OpKind::Insert,
                OpKind::Count,
                OpKind::Update,
                OpKind::Query,
                OpKind::Remove,
                OpKind::Command
            ]
        );
        assert_eq!(log[3].nreturned, 1);
        assert!(log.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[test]
    fn test_eval_is_recorded_after_its_queries() {
        let db = open();
        db.insert("evalb", json!({"x": 3})).unwrap();
        assert_eq!(
            db.eval("function(){ return db.evalb.findOne().x; }", vec![]).unwrap(),
            json!(3)
        );

        db.set_profiling_level(2, None).unwrap();
        let script = "function(){ return db.evalb.findOne().x; }";
        assert_eq!(db.eval(script, vec![]).unwrap(), json!(3));

        let log = db.profile_log(Some(2)).unwrap();
        assert_eq!(log[0].op, OpKind::Eval);
        assert_eq!(log[0].ns, "test.$cmd");
        assert!(log[0].info.contains("findOne().x"));
        assert_eq!(log[1].op, OpKind::Query);
        assert_eq!(log[1].ns, "test.evalb");
        assert!(log[1].info.starts_with("query test.evalb ntoreturn:1"));
        db.set_profiling_level(0, None).unwrap();
    }

    #[test]
    fn test_eval_failures_are_recorded() {
        let db = open();
        db.set_profiling_level(2, None).unwrap();

        let err = db
            .eval("db.system.profile.remove({})", vec![])
            .unwrap_err();
        assert!(err.to_string().contains("not authorized for remove on test.system.profile"));
        let err = db.eval("throw 'stop'", vec![]).unwrap_err();
        assert!(matches!(err, DbError::Eval(EvalError::Runtime { .. })));

        let log = db.profile_log(None).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|r| r.op == OpKind::Eval && r.error.is_some()));
        assert!(log[0].error.as_deref().unwrap().contains("uncaught exception: stop"));
    }

    #[test]
    fn test_parse_errors_leave_no_record() {
        let db = open();
        db.set_profiling_level(2, None).unwrap();

        let err = db.eval("var = 1", vec![]).unwrap_err();
        assert!(matches!(err, DbError::Eval(EvalError::Parse(_))));
        let evaluation = db.eval_request(&EvalRequest::new("db.t.find(("));
        assert!(matches!(evaluation.result, Err(EvalError::Parse(_))));

        assert!(db.profile_log(None).unwrap().is_empty());
        assert_eq!(db.profiler().records_written(), 0);
    }

    #[test]
    fn test_eval_timeout_from_config() {
        let db = Database::open(DbConfig {
            eval_timeout_ms: 20,
            ..DbConfig::default()
        })
        .unwrap();
        let err = db.eval("while (true) {}", vec![]).unwrap_err();
        assert!(matches!(err, DbError::Eval(EvalError::Timeout { ms: 20 })));
    }

    #[test]
    fn test_invalid_levels_rejected() {
        let db = open();
        for level in [-1, 3, 100] {
            let err = db.set_profiling_level(level, None).unwrap_err();
            assert!(matches!(err, DbError::InvalidProfilingLevel(l) if l == level));
        }
        assert_eq!(db.profiling_status().was, ProfilingLevel::Off);
    }

    #[test]
    fn test_slow_threshold_roundtrip() {
        let db = open();
        let before = db.set_profiling_level(1, Some(250)).unwrap();
        assert_eq!(before.was, ProfilingLevel::Off);
        let now = db.profiling_status();
        assert_eq!(now.was, ProfilingLevel::SlowOnly);
        assert_eq!(now.slow_ms, 250);
    }

    #[test]
    fn test_log_is_capped() {
        let db = Database::open(DbConfig {
            profile_capacity: 3,
            profiling_level: 2,
            ..DbConfig::default()
        })
        .unwrap();
        for i in 0..10 {
            db.insert("t", json!({ "i": i })).unwrap();
        }
        let log = db.profile_log(None).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].seq, 10);
        assert_eq!(log[2].seq, 8);
    }

    #[test]
    fn test_failing_sink_never_fails_the_operation() {
        let config = DbConfig {
            profiling_level: 2,
            ..DbConfig::default()
        };
        let db = Database::with_sink(Arc::new(Store::new()), Arc::new(FailingSink), config).unwrap();
        db.insert("t", json!({"a": 1})).unwrap();
        assert_eq!(db.eval("db.t.count()", vec![]).unwrap(), json!(1));
        // insert, the nested count, and the eval itself
        assert_eq!(db.profiler().write_failures(), 3);
    }

    #[test]
    fn test_memory_sink_sees_nested_operations() {
        let sink = Arc::new(MemorySink::new());
        let db = Database::with_sink(Arc::new(Store::new()), sink.clone(), DbConfig::default()).unwrap();
        db.set_profiling_level(2, None).unwrap();
        db.eval("db.a.insert({v: 1}); db.a.insert({v: 2}); db.a.find().toArray().length", vec![])
            .unwrap();
        let ops: Vec<_> = sink.records().iter().map(|r| r.op).collect();
        assert_eq!(
            ops,
            vec![OpKind::Insert, OpKind::Insert, OpKind::Query, OpKind::Eval]
        );
    }

    #[test]
    fn test_failed_operation_is_recorded_with_error() {
        let db = open();
        db.set_profiling_level(2, None).unwrap();
        assert!(db.find("t", &FindRequest::new().with_filter(json!(5))).is_err());
        let log = db.profile_log(None).unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].error.is_some());
    }
}
