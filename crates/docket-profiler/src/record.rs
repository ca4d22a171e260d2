use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of operation being profiled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Query,
    Count,
    Insert,
    Update,
    Remove,
    Command,
    Eval,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Query => "query",
            OpKind::Count => "count",
            OpKind::Insert => "insert",
            OpKind::Update => "update",
            OpKind::Remove => "remove",
            OpKind::Command => "command",
            OpKind::Eval => "eval",
        };
        f.write_str(name)
    }
}

/// What an operation reports about itself when it completes
#[derive(Debug, Clone, PartialEq)]
pub struct OpMeta {
    pub kind: OpKind,
    pub ns: String,
    /// Human-readable description; carries the operation's identifying text
    pub info: String,
    pub nreturned: u64,
    pub nscanned: u64,
    /// Error message when the operation failed
    pub error: Option<String>,
}

impl OpMeta {
    pub fn new(kind: OpKind, ns: impl Into<String>, info: impl Into<String>) -> Self {
        Self {
            kind,
            ns: ns.into(),
            info: info.into(),
            nreturned: 0,
            nscanned: 0,
            error: None,
        }
    }

    pub fn with_counts(mut self, nreturned: u64, nscanned: u64) -> Self {
        self.nreturned = nreturned;
        self.nscanned = nscanned;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// One entry of the profile log. Never modified once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// Position in the log; strictly increasing in append order
    pub seq: u64,
    /// When the operation started
    pub ts: DateTime<Utc>,
    /// Duration in microseconds
    pub micros: u64,
    pub op: OpKind,
    pub ns: String,
    pub info: String,
    pub nreturned: u64,
    pub nscanned: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProfileRecord {
    pub fn millis(&self) -> u64 {
        self.micros / 1_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_document_shape() {
        let record = ProfileRecord {
            seq: 4,
            ts: Utc::now(),
            micros: 2_500,
            op: OpKind::Eval,
            ns: "test.$cmd".into(),
            info: "eval test.$cmd code: return 1".into(),
            nreturned: 1,
            nscanned: 0,
            error: None,
        };
        let doc = serde_json::to_value(&record).unwrap();
        assert_eq!(doc["op"], "eval");
        assert_eq!(doc["micros"], 2_500);
        assert!(doc.get("error").is_none());
        assert!(doc["ts"].is_string());
        assert_eq!(record.millis(), 2);

        let back: ProfileRecord = serde_json::from_value(doc).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_meta_builder() {
        let meta = OpMeta::new(OpKind::Query, "test.t", "query test.t")
            .with_counts(1, 3)
            .with_error("boom");
        assert_eq!(meta.nreturned, 1);
        assert_eq!(meta.nscanned, 3);
        assert_eq!(meta.error.as_deref(), Some("boom"));
    }
}
