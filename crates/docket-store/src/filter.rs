//! Query filters
//!
//! A filter is a JSON object mapping dotted field paths to either a literal
//! (equality) or an operator object such as `{"$gt": 5}`. `$and`/`$or`
//! combine sub-filters. The empty object matches every document.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::StoreError;
use crate::value::{compare_values, get_path, type_rank, values_equal};
use crate::Document;

/// Compiled filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All(Vec<Filter>),
    Any(Vec<Filter>),
    Field { path: String, cond: Condition },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    /// Several operators on the same field (`{"$gt": 1, "$lt": 5}`)
    And(Vec<Condition>),
}

impl Filter {
    /// Matches every document
    pub fn all() -> Self {
        Filter::All(Vec::new())
    }

    /// Compile a JSON filter. `null` is accepted as "match everything".
    pub fn parse(spec: &Value) -> Result<Self, StoreError> {
        match spec {
            Value::Null => Ok(Filter::all()),
            Value::Object(map) => {
                let mut clauses = Vec::with_capacity(map.len());
                for (key, value) in map {
                    clauses.push(Self::parse_clause(key, value)?);
                }
                Ok(Filter::All(clauses))
            }
            other => Err(StoreError::InvalidFilter(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    fn parse_clause(key: &str, value: &Value) -> Result<Self, StoreError> {
        match key {
            "$and" | "$or" => {
                let items = value.as_array().ok_or_else(|| {
                    StoreError::InvalidFilter(format!("{} expects an array", key))
                })?;
                let subs = items
                    .iter()
                    .map(Filter::parse)
                    .collect::<Result<Vec<_>, _>>()?;
                if key == "$and" {
                    Ok(Filter::All(subs))
                } else {
                    Ok(Filter::Any(subs))
                }
            }
            op if op.starts_with('$') => Err(StoreError::InvalidFilter(format!(
                "unknown top-level operator {}",
                op
            ))),
            path => Ok(Filter::Field {
                path: path.to_string(),
                cond: Condition::parse(value)?,
            }),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All(subs) => subs.iter().all(|f| f.matches(doc)),
            Filter::Any(subs) => subs.iter().any(|f| f.matches(doc)),
            Filter::Field { path, cond } => cond.matches(get_path(doc, path)),
        }
    }
}

impl Condition {
    fn parse(value: &Value) -> Result<Self, StoreError> {
        let ops = match value {
            Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => map,
            other => return Ok(Condition::Eq(other.clone())),
        };

        let mut conds = Vec::with_capacity(ops.len());
        for (op, arg) in ops {
            let cond = match op.as_str() {
                "$eq" => Condition::Eq(arg.clone()),
                "$ne" => Condition::Ne(arg.clone()),
                "$gt" => Condition::Gt(arg.clone()),
                "$gte" => Condition::Gte(arg.clone()),
                "$lt" => Condition::Lt(arg.clone()),
                "$lte" => Condition::Lte(arg.clone()),
                "$in" | "$nin" => {
                    let items = arg.as_array().cloned().ok_or_else(|| {
                        StoreError::InvalidFilter(format!("{} expects an array", op))
                    })?;
                    if op == "$in" {
                        Condition::In(items)
                    } else {
                        Condition::Nin(items)
                    }
                }
                "$exists" => Condition::Exists(truthy(arg)),
                other => {
                    return Err(StoreError::InvalidFilter(format!(
                        "unknown operator {}",
                        other
                    )))
                }
            };
            conds.push(cond);
        }

        if conds.len() == 1 {
            Ok(conds.remove(0))
        } else {
            Ok(Condition::And(conds))
        }
    }

    fn matches(&self, field: Option<&Value>) -> bool {
        match self {
            Condition::Exists(expected) => field.is_some() == *expected,
            Condition::Eq(target) => eq_matches(field, target),
            Condition::Ne(target) => !eq_matches(field, target),
            Condition::In(items) => items.iter().any(|item| eq_matches(field, item)),
            Condition::Nin(items) => !items.iter().any(|item| eq_matches(field, item)),
            Condition::Gt(target) => ord_matches(field, target, |o| o == Ordering::Greater),
            Condition::Gte(target) => ord_matches(field, target, |o| o != Ordering::Less),
            Condition::Lt(target) => ord_matches(field, target, |o| o == Ordering::Less),
            Condition::Lte(target) => ord_matches(field, target, |o| o != Ordering::Greater),
            Condition::And(conds) => conds.iter().all(|c| c.matches(field)),
        }
    }
}

/// Equality; a missing field equals `null`, and an array field matches when
/// any element does.
fn eq_matches(field: Option<&Value>, target: &Value) -> bool {
    match field {
        None => target.is_null(),
        Some(value) => {
            if values_equal(value, target) {
                return true;
            }
            match value {
                Value::Array(items) => items.iter().any(|item| values_equal(item, target)),
                _ => false,
            }
        }
    }
}

/// Range comparisons only match values of the same type class
fn ord_matches(field: Option<&Value>, target: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let check = |value: &Value| {
        type_rank(value) == type_rank(target) && accept(compare_values(value, target))
    };
    match field {
        None => false,
        Some(Value::Array(items)) if !target.is_array() => items.iter().any(check),
        Some(value) => check(value),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}
