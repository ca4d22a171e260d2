//! Mutation Module - Parse and apply update documents
//!
//! An update is either a replacement document or an operator document using
//! `$set`, `$unset` and `$inc`. The two forms cannot be mixed, and `_id` can
//! never be changed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::StoreError;
use crate::Document;

/// Result of an update or remove
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResult {
    /// Documents matched by the filter
    pub matched: usize,
    /// Documents actually changed
    pub modified: usize,
}

impl MutationResult {
    pub fn new(matched: usize, modified: usize) -> Self {
        Self { matched, modified }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(String, Value),
    Unset(String),
    Inc(String, Number),
}

/// Parsed update document
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateSpec {
    Replace(Document),
    Operators(Vec<UpdateOp>),
}

impl UpdateSpec {
    pub fn parse(spec: &Value) -> Result<Self, StoreError> {
        let map = spec.as_object().ok_or_else(|| {
            StoreError::InvalidUpdate(format!("expected an object, got {}", spec))
        })?;

        let operator_keys = map.keys().filter(|k| k.starts_with('$')).count();
        if operator_keys == 0 {
            return Ok(UpdateSpec::Replace(map.clone()));
        }
        if operator_keys != map.len() {
            return Err(StoreError::InvalidUpdate(
                "cannot mix update operators and plain fields".into(),
            ));
        }

        let mut ops = Vec::new();
        for (op, fields) in map {
            let fields = fields.as_object().ok_or_else(|| {
                StoreError::InvalidUpdate(format!("{} expects an object", op))
            })?;
            for (path, value) in fields {
                if path == "_id" || path.starts_with("_id.") {
                    return Err(StoreError::InvalidUpdate("_id cannot be modified".into()));
                }
                let update = match op.as_str() {
                    "$set" => UpdateOp::Set(path.clone(), value.clone()),
                    "$unset" => UpdateOp::Unset(path.clone()),
                    "$inc" => match value {
                        Value::Number(n) => UpdateOp::Inc(path.clone(), n.clone()),
                        other => {
                            return Err(StoreError::InvalidUpdate(format!(
                                "$inc value for '{}' must be a number, got {}",
                                path, other
                            )))
                        }
                    },
                    other => {
                        return Err(StoreError::InvalidUpdate(format!(
                            "unknown update operator {}",
                            other
                        )))
                    }
                };
                ops.push(update);
            }
        }
        Ok(UpdateSpec::Operators(ops))
    }

    /// Apply to a document in place; returns whether anything changed
    pub fn apply(&self, doc: &mut Document) -> Result<bool, StoreError> {
        match self {
            UpdateSpec::Replace(replacement) => {
                let mut next = Map::new();
                if let Some(id) = doc.get("_id") {
                    next.insert("_id".into(), id.clone());
                }
                for (k, v) in replacement {
                    if k != "_id" {
                        next.insert(k.clone(), v.clone());
                    }
                }
                let changed = *doc != next;
                *doc = next;
                Ok(changed)
            }
            UpdateSpec::Operators(ops) => {
                let mut changed = false;
                for op in ops {
                    changed |= apply_op(doc, op)?;
                }
                Ok(changed)
            }
        }
    }
}

fn apply_op(doc: &mut Document, op: &UpdateOp) -> Result<bool, StoreError> {
    match op {
        UpdateOp::Set(path, value) => {
            let (parent, leaf) = parent_for_write(doc, path)?;
            let changed = parent.get(leaf) != Some(value);
            parent.insert(leaf.to_string(), value.clone());
            Ok(changed)
        }
        UpdateOp::Unset(path) => {
            let (head, leaf) = split_path(path);
            let parent = match head {
                None => Some(doc),
                Some(head) => navigate(doc, head),
            };
            Ok(parent.is_some_and(|p| p.shift_remove(leaf).is_some()))
        }
        UpdateOp::Inc(path, by) => {
            let (parent, leaf) = parent_for_write(doc, path)?;
            let current = parent.get(leaf).cloned().unwrap_or(Value::from(0));
            let Value::Number(current) = current else {
                return Err(StoreError::InvalidUpdate(format!(
                    "cannot $inc non-numeric field '{}'",
                    path
                )));
            };
            let next = add_numbers(&current, by);
            parent.insert(leaf.to_string(), Value::Number(next));
            Ok(true)
        }
    }
}

fn split_path(path: &str) -> (Option<&str>, &str) {
    match path.rsplit_once('.') {
        Some((head, leaf)) => (Some(head), leaf),
        None => (None, path),
    }
}

fn navigate<'a>(doc: &'a mut Document, path: &str) -> Option<&'a mut Document> {
    let mut current = doc;
    for part in path.split('.') {
        current = current.get_mut(part)?.as_object_mut()?;
    }
    Some(current)
}

/// Find (creating intermediate objects) the object that holds the last path segment
fn parent_for_write<'a, 'p>(
    doc: &'a mut Document,
    path: &'p str,
) -> Result<(&'a mut Document, &'p str), StoreError> {
    let (head, leaf) = split_path(path);
    let Some(head) = head else {
        return Ok((doc, leaf));
    };
    let mut current = doc;
    for part in head.split('.') {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = entry.as_object_mut().ok_or_else(|| {
            StoreError::InvalidUpdate(format!("cannot create field in non-object '{}'", part))
        })?;
    }
    Ok((current, leaf))
}

fn add_numbers(a: &Number, b: &Number) -> Number {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Number::from(sum);
        }
    }
    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).unwrap_or_else(|| Number::from(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn apply(update: Value, target: Value) -> (bool, Value) {
        let spec = UpdateSpec::parse(&update).unwrap();
        let mut d = doc(target);
        let changed = spec.apply(&mut d).unwrap();
        (changed, Value::Object(d))
    }

    #[test]
    fn test_replacement_keeps_id() {
        let (changed, out) = apply(json!({"y": 2}), json!({"_id": 7, "x": 1}));
        assert!(changed);
        assert_eq!(out, json!({"_id": 7, "y": 2}));
    }

    #[test]
    fn test_set_nested_creates_objects() {
        let (changed, out) = apply(json!({"$set": {"a.b": 1}}), json!({"_id": 1}));
        assert!(changed);
        assert_eq!(out, json!({"_id": 1, "a": {"b": 1}}));
    }

    #[test]
    fn test_set_same_value_is_not_a_change() {
        let (changed, _) = apply(json!({"$set": {"x": 1}}), json!({"x": 1}));
        assert!(!changed);
    }

    #[test]
    fn test_unset() {
        let (changed, out) = apply(json!({"$unset": {"a.b": 1}}), json!({"a": {"b": 1, "c": 2}}));
        assert!(changed);
        assert_eq!(out, json!({"a": {"c": 2}}));
        let (changed, _) = apply(json!({"$unset": {"zzz": 1}}), json!({"a": 1}));
        assert!(!changed);
    }

    #[test]
    fn test_inc() {
        let (_, out) = apply(json!({"$inc": {"n": 2, "m": 1.5}}), json!({"n": 3}));
        assert_eq!(out, json!({"n": 5, "m": 1.5}));
    }

    #[test]
    fn test_inc_non_numeric_fails() {
        let spec = UpdateSpec::parse(&json!({"$inc": {"s": 1}})).unwrap();
        let mut d = doc(json!({"s": "text"}));
        assert!(spec.apply(&mut d).is_err());
    }

    #[test]
    fn test_invalid_updates() {
        assert!(UpdateSpec::parse(&json!({"$set": {"_id": 1}})).is_err());
        assert!(UpdateSpec::parse(&json!({"$set": {"a": 1}, "b": 2})).is_err());
        assert!(UpdateSpec::parse(&json!({"$push": {"a": 1}})).is_err());
        assert!(UpdateSpec::parse(&json!(3)).is_err());
    }
}
