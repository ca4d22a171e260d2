//! Query Engine - Execute find requests against a collection
//!
//! Supports filtering, ordering by fields or natural (insertion) order, and
//! skip/limit pagination. There are no indexes: every query is a collection
//! scan, and `nscanned` reports how many documents the scan examined.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collection::Collection;
use crate::error::StoreError;
use crate::filter::Filter;
use crate::value::{compare_values, get_path};
use crate::Document;

/// Find request against a single collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindRequest {
    /// Filter document; `Null` or `{}` matches everything
    pub filter: Value,

    /// Sort document, e.g. `{"a": 1, "b": -1}` or `{"$natural": -1}`
    pub sort: Option<Value>,

    /// Number of matching documents to skip
    pub skip: usize,

    /// Optional limit on results
    pub limit: Option<usize>,
}

impl FindRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sort(mut self, sort: Value) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The request a `findOne` issues
    pub fn one(filter: Value) -> Self {
        Self::new().with_filter(filter).with_limit(1)
    }
}

/// Query result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindResult {
    /// Matching documents
    pub documents: Vec<Document>,

    /// Documents examined by the scan
    pub nscanned: usize,

    /// Whether more matches exist past the limit
    pub has_more: bool,
}

/// One component of a sort specification
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    /// Insertion order
    Natural { ascending: bool },
    Field { path: String, ascending: bool },
}

/// Parse a sort document into ordered keys
pub fn parse_sort(spec: &Value) -> Result<Vec<SortKey>, StoreError> {
    let map = spec
        .as_object()
        .ok_or_else(|| StoreError::InvalidSort(format!("expected an object, got {}", spec)))?;

    let mut keys = Vec::with_capacity(map.len());
    for (field, dir) in map {
        let ascending = match dir.as_f64() {
            Some(d) if d > 0.0 => true,
            Some(d) if d < 0.0 => false,
            _ => {
                return Err(StoreError::InvalidSort(format!(
                    "direction for '{}' must be 1 or -1",
                    field
                )))
            }
        };
        if field == "$natural" {
            if !keys.is_empty() {
                return Err(StoreError::InvalidSort(
                    "$natural cannot be combined with other keys".into(),
                ));
            }
            keys.push(SortKey::Natural { ascending });
        } else {
            if matches!(keys.first(), Some(SortKey::Natural { .. })) {
                return Err(StoreError::InvalidSort(
                    "$natural cannot be combined with other keys".into(),
                ));
            }
            keys.push(SortKey::Field {
                path: field.clone(),
                ascending,
            });
        }
    }
    Ok(keys)
}

/// Execute a find request against a collection
pub fn execute(collection: &Collection, request: &FindRequest) -> Result<FindResult, StoreError> {
    let filter = Filter::parse(&request.filter)?;
    let keys = match &request.sort {
        Some(spec) => parse_sort(spec)?,
        None => Vec::new(),
    };

    let natural_desc = matches!(keys.first(), Some(SortKey::Natural { ascending: false }));
    let field_sort = matches!(keys.first(), Some(SortKey::Field { .. }));

    // Without a field sort the scan order is the result order, so the scan
    // can stop as soon as one match past the page has been seen.
    let wanted = if field_sort {
        None
    } else {
        request
            .limit
            .map(|l| request.skip.saturating_add(l).saturating_add(1))
    };

    let mut nscanned = 0;
    let mut matched: Vec<&Document> = Vec::new();
    let scan: Box<dyn Iterator<Item = &Document> + '_> = if natural_desc {
        Box::new(collection.iter().rev())
    } else {
        Box::new(collection.iter())
    };
    for doc in scan {
        if wanted.is_some_and(|w| matched.len() >= w) {
            break;
        }
        nscanned += 1;
        if filter.matches(doc) {
            matched.push(doc);
        }
    }

    if field_sort {
        apply_ordering(&mut matched, &keys);
    }

    let total = matched.len();
    let start = request.skip.min(total);
    let end = request
        .limit
        .map(|l| start.saturating_add(l).min(total))
        .unwrap_or(total);
    let documents = matched[start..end].iter().map(|d| (*d).clone()).collect();

    Ok(FindResult {
        documents,
        nscanned,
        has_more: end < total,
    })
}

/// Stable multi-key sort; missing fields sort as `null`
fn apply_ordering(docs: &mut [&Document], keys: &[SortKey]) {
    docs.sort_by(|a, b| {
        for key in keys {
            let SortKey::Field { path, ascending } = key else {
                continue;
            };
            let left = get_path(a, path).unwrap_or(&Value::Null);
            let right = get_path(b, path).unwrap_or(&Value::Null);
            let ord = compare_values(left, right);
            let ord = if *ascending { ord } else { ord.reverse() };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup_collection() -> Collection {
        let mut coll = Collection::new("test.people", None);
        for (i, (name, age)) in [("ann", 31), ("bob", 25), ("cid", 40), ("dee", 25)]
            .into_iter()
            .enumerate()
        {
            coll.push(
                json!({"_id": i, "name": name, "age": age})
                    .as_object()
                    .cloned()
                    .unwrap(),
            );
        }
        coll
    }

    fn names(result: &FindResult) -> Vec<&str> {
        result
            .documents
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn test_find_all_natural_order() {
        let coll = setup_collection();
        let result = execute(&coll, &FindRequest::new()).unwrap();
        assert_eq!(names(&result), vec!["ann", "bob", "cid", "dee"]);
        assert_eq!(result.nscanned, 4);
        assert!(!result.has_more);
    }

    #[test]
    fn test_find_with_filter() {
        let coll = setup_collection();
        let request = FindRequest::new().with_filter(json!({"age": 25}));
        let result = execute(&coll, &request).unwrap();
        assert_eq!(names(&result), vec!["bob", "dee"]);
    }

    #[test]
    fn test_natural_descending_limit() {
        let coll = setup_collection();
        let request = FindRequest::new()
            .with_sort(json!({"$natural": -1}))
            .with_limit(1);
        let result = execute(&coll, &request).unwrap();
        assert_eq!(names(&result), vec!["dee"]);
        assert!(result.has_more);
        // Stops after the first match past the page
        assert_eq!(result.nscanned, 2);
    }

    #[test]
    fn test_multi_key_ordering() {
        let coll = setup_collection();
        let request = FindRequest::new().with_sort(json!({"age": 1, "name": -1}));
        let result = execute(&coll, &request).unwrap();
        assert_eq!(names(&result), vec!["dee", "bob", "ann", "cid"]);
        assert_eq!(result.nscanned, 4);
    }

    #[test]
    fn test_pagination() {
        let coll = setup_collection();
        let request = FindRequest::new()
            .with_sort(json!({"name": 1}))
            .with_skip(1)
            .with_limit(2);
        let result = execute(&coll, &request).unwrap();
        assert_eq!(names(&result), vec!["bob", "cid"]);
        assert!(result.has_more);
    }

    #[test]
    fn test_extreme_skip_and_limit() {
        let coll = setup_collection();
        let request = FindRequest::new().with_limit(usize::MAX);
        let result = execute(&coll, &request).unwrap();
        assert_eq!(names(&result), vec!["ann", "bob", "cid", "dee"]);
        assert!(!result.has_more);

        let request = FindRequest::new()
            .with_sort(json!({"name": -1}))
            .with_skip(1)
            .with_limit(usize::MAX);
        let result = execute(&coll, &request).unwrap();
        assert_eq!(names(&result), vec!["cid", "bob", "ann"]);

        let request = FindRequest::new().with_skip(usize::MAX).with_limit(usize::MAX);
        let result = execute(&coll, &request).unwrap();
        assert!(result.documents.is_empty());
        assert_eq!(result.nscanned, 4);
    }

    #[test]
    fn test_find_one_request() {
        let coll = setup_collection();
        let result = execute(&coll, &FindRequest::one(json!({"age": {"$gt": 30}}))).unwrap();
        assert_eq!(names(&result), vec!["ann"]);
        assert_eq!(result.nscanned, 3);
    }

    #[test]
    fn test_invalid_sort() {
        assert!(parse_sort(&json!({"a": 0})).is_err());
        assert!(parse_sort(&json!({"$natural": 1, "a": 1})).is_err());
        assert!(parse_sort(&json!([1])).is_err());
    }
}
