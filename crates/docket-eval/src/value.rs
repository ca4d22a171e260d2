//! Script values and their conversion to and from the store's JSON model

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use docket_store::{Document, FindRequest};
use serde_json::{Map, Number, Value};

/// Objects nested deeper than this cannot be converted to JSON
const MAX_CONVERT_DEPTH: usize = 100;

/// Insertion-ordered object fields
#[derive(Debug, Default, Clone)]
pub struct Object {
    fields: Vec<(String, ScriptValue)>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn set(&mut self, key: impl Into<String>, value: ScriptValue) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScriptValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Lazily executed query built by `collection.find()`
#[derive(Debug)]
pub struct Cursor {
    pub collection: String,
    pub request: FindRequest,
    /// Filled on first read; later modifiers are rejected once set
    pub buffer: Option<VecDeque<Document>>,
}

impl Cursor {
    pub fn new(collection: String, filter: Value) -> Self {
        Self {
            collection,
            request: FindRequest::new().with_filter(filter),
            buffer: None,
        }
    }

    pub fn started(&self) -> bool {
        self.buffer.is_some()
    }
}

/// Functions callable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    ToJson,
}

/// A value inside a running script
#[derive(Debug, Clone)]
pub enum ScriptValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Rc<str>),
    Array(Rc<RefCell<Vec<ScriptValue>>>),
    Object(Rc<RefCell<Object>>),
    /// The `db` handle
    Db,
    /// A collection handle, by collection name within the database
    Collection(Rc<str>),
    Cursor(Rc<RefCell<Cursor>>),
    Builtin(Builtin),
}

impl ScriptValue {
    pub fn string(s: impl AsRef<str>) -> Self {
        ScriptValue::String(Rc::from(s.as_ref()))
    }

    pub fn array(items: Vec<ScriptValue>) -> Self {
        ScriptValue::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(obj: Object) -> Self {
        ScriptValue::Object(Rc::new(RefCell::new(obj)))
    }

    /// Name of the value's type, as used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Undefined => "undefined",
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Int(_) | ScriptValue::Float(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::Array(_) => "array",
            ScriptValue::Object(_) => "object",
            ScriptValue::Db => "database",
            ScriptValue::Collection(_) => "collection",
            ScriptValue::Cursor(_) => "cursor",
            ScriptValue::Builtin(_) => "function",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, ScriptValue::Undefined | ScriptValue::Null)
    }

    pub fn truthy(&self) -> bool {
        match self {
            ScriptValue::Undefined | ScriptValue::Null => false,
            ScriptValue::Bool(b) => *b,
            ScriptValue::Int(n) => *n != 0,
            ScriptValue::Float(f) => *f != 0.0 && !f.is_nan(),
            ScriptValue::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Int(n) => Some(*n as f64),
            ScriptValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Non-negative integer view, for limits and indexes
    pub fn as_index(&self) -> Option<usize> {
        match self {
            ScriptValue::Int(n) => usize::try_from(*n).ok(),
            ScriptValue::Float(f) if f.fract() == 0.0 && *f >= 0.0 => Some(*f as usize),
            _ => None,
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ScriptValue::Null,
            Value::Bool(b) => ScriptValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ScriptValue::Int(i),
                None => ScriptValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => ScriptValue::string(s),
            Value::Array(items) => ScriptValue::array(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => ScriptValue::from_document(map),
        }
    }

    pub fn from_document(doc: &Document) -> Self {
        let mut obj = Object::new();
        for (k, v) in doc {
            obj.set(k.clone(), Self::from_json(v));
        }
        ScriptValue::object(obj)
    }

    /// Convert to the store's value model.
    ///
    /// `undefined` becomes `null` (and is dropped from objects), non-finite
    /// floats become `null`, host handles cannot be converted.
    pub fn to_json(&self) -> Result<Value, String> {
        self.to_json_at(0)
    }

    fn to_json_at(&self, depth: usize) -> Result<Value, String> {
        if depth > MAX_CONVERT_DEPTH {
            return Err("value is nested too deeply to convert".into());
        }
        Ok(match self {
            ScriptValue::Undefined | ScriptValue::Null => Value::Null,
            ScriptValue::Bool(b) => Value::Bool(*b),
            ScriptValue::Int(n) => Value::from(*n),
            ScriptValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            ScriptValue::String(s) => Value::String(s.to_string()),
            ScriptValue::Array(items) => {
                let items = items.borrow();
                let mut out = Vec::with_capacity(items.len());
                for item in items.iter() {
                    out.push(item.to_json_at(depth + 1)?);
                }
                Value::Array(out)
            }
            ScriptValue::Object(obj) => {
                let obj = obj.borrow();
                let mut out = Map::with_capacity(obj.len());
                for (k, v) in obj.iter() {
                    if matches!(v, ScriptValue::Undefined) {
                        continue;
                    }
                    out.insert(k.to_string(), v.to_json_at(depth + 1)?);
                }
                Value::Object(out)
            }
            other => return Err(format!("cannot convert a {} to a document value", other.type_name())),
        })
    }

    /// String form used by `+` concatenation and `print`
    pub fn display_string(&self) -> String {
        match self {
            ScriptValue::Undefined => "undefined".into(),
            ScriptValue::Null => "null".into(),
            ScriptValue::Bool(b) => b.to_string(),
            ScriptValue::Int(n) => n.to_string(),
            ScriptValue::Float(f) => format_float(*f),
            ScriptValue::String(s) => s.to_string(),
            ScriptValue::Db => "[object Database]".into(),
            ScriptValue::Collection(name) => format!("[object Collection {}]", name),
            ScriptValue::Cursor(_) => "[object Cursor]".into(),
            ScriptValue::Builtin(b) => format!("[function {:?}]", b),
            ScriptValue::Array(_) | ScriptValue::Object(_) => self.to_json_string(),
        }
    }

    /// `tojson()` form: JSON text, or a placeholder when the value has no JSON form
    pub fn to_json_string(&self) -> String {
        match (self.to_json(), self) {
            (Ok(json), _) => json.to_string(),
            (Err(_), ScriptValue::Array(_)) => "[object Array]".into(),
            (Err(_), ScriptValue::Object(_)) => "[object Object]".into(),
            (Err(_), other) => other.display_string(),
        }
    }

    /// Address and strong count of an array or object
    fn container_ref(&self) -> Option<(usize, usize)> {
        match self {
            ScriptValue::Array(items) => Some((Rc::as_ptr(items) as usize, Rc::strong_count(items))),
            ScriptValue::Object(obj) => Some((Rc::as_ptr(obj) as usize, Rc::strong_count(obj))),
            _ => None,
        }
    }

    pub(crate) fn is_container(&self) -> bool {
        self.container_ref().is_some()
    }

    /// Empty an array or object in place
    fn sever(&self) {
        match self {
            ScriptValue::Array(items) => {
                if let Ok(mut items) = items.try_borrow_mut() {
                    drop(std::mem::take(&mut *items));
                }
            }
            ScriptValue::Object(obj) => {
                if let Ok(mut obj) = obj.try_borrow_mut() {
                    drop(std::mem::take(&mut *obj));
                }
            }
            _ => {}
        }
    }
}

/// Arrays and objects that were given another array or object to hold.
///
/// Only these can close a reference cycle or grow a deep chain. They stay
/// alive here until swept or released, and are emptied one at a time, so
/// dropping any of them never recurses further than one level.
#[derive(Debug, Default)]
pub(crate) struct Links {
    held: Vec<ScriptValue>,
    seen: HashSet<usize>,
    sweep_at: usize,
}

/// Tracked containers before the first sweep
const LINKS_SWEEP_MIN: usize = 1024;

impl Links {
    /// Track `container` after an array or object was stored into it
    pub(crate) fn note(&mut self, container: &ScriptValue) {
        let Some((addr, _)) = container.container_ref() else {
            return;
        };
        if !self.seen.insert(addr) {
            return;
        }
        self.held.push(container.clone());
        if self.held.len() >= self.sweep_at.max(LINKS_SWEEP_MIN) {
            self.sweep();
            self.sweep_at = self.held.len() * 2;
        }
    }

    /// Release tracked containers that only this list still refers to.
    ///
    /// Newest first, so emptying a parent frees its children in the same pass.
    pub(crate) fn sweep(&mut self) {
        for value in self.held.iter().rev() {
            if let Some((addr, 1)) = value.container_ref() {
                value.sever();
                self.seen.remove(&addr);
            }
        }
        self.held
            .retain(|value| !matches!(value.container_ref(), Some((_, 1))));
    }

    /// Empty every tracked container, breaking any cycles among them
    pub(crate) fn release(&mut self) {
        for value in self.held.drain(..) {
            value.sever();
        }
        self.seen.clear();
    }
}

impl Drop for Links {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_string())
    }
}

/// Floats print like JavaScript numbers: `3` rather than `3.0`
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".into()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.into()
    } else if f == 0.0 {
        "0".into()
    } else if f.fract() == 0.0 && f.abs() < 1e21 {
        format!("{:.0}", f)
    } else if f.abs() >= 1e21 {
        let exp = format!("{:e}", f);
        match exp.split_once('e') {
            Some((mantissa, power)) if !power.starts_with('-') => format!("{}e+{}", mantissa, power),
            _ => exp,
        }
    } else {
        format!("{}", f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip_preserves_number_kinds() {
        let original = json!({"i": 3, "f": 2.0, "s": "x", "a": [1, null, true], "o": {"k": -1}});
        let back = ScriptValue::from_json(&original).to_json().unwrap();
        assert_eq!(back, original);
        assert!(back["f"].is_f64());
        assert!(back["i"].is_i64());
    }

    #[test]
    fn test_undefined_dropped_from_objects() {
        let mut obj = Object::new();
        obj.set("a", ScriptValue::Undefined);
        obj.set("b", ScriptValue::Int(1));
        let json = ScriptValue::object(obj).to_json().unwrap();
        assert_eq!(json, json!({"b": 1}));
    }

    #[test]
    fn test_host_values_do_not_convert() {
        assert!(ScriptValue::Db.to_json().is_err());
        assert!(ScriptValue::Collection(Rc::from("t")).to_json().is_err());
    }

    #[test]
    fn test_self_referencing_object_fails_cleanly() {
        let obj = Rc::new(RefCell::new(Object::new()));
        obj.borrow_mut().set("me", ScriptValue::Object(obj.clone()));
        let err = ScriptValue::Object(obj.clone()).to_json().unwrap_err();
        assert!(err.contains("nested too deeply"));
        // Break the cycle so the test does not leak
        obj.borrow_mut().set("me", ScriptValue::Null);
    }

    #[test]
    fn test_cyclic_object_displays_as_placeholder() {
        let obj = ScriptValue::object(Object::new());
        let ScriptValue::Object(rc) = &obj else {
            unreachable!()
        };
        rc.borrow_mut().set("me", obj.clone());
        assert_eq!(obj.display_string(), "[object Object]");
        assert_eq!(obj.to_json_string(), "[object Object]");

        let mut links = Links::default();
        links.note(&obj);
        links.note(&obj);
        assert_eq!(links.held.len(), 1);
        assert_eq!(Rc::strong_count(rc), 3);
        links.release();
        assert_eq!(Rc::strong_count(rc), 1);
    }

    #[test]
    fn test_sweep_frees_whole_chains() {
        let mut links = Links::default();
        let mut head = ScriptValue::object(Object::new());
        for _ in 0..10 {
            let mut obj = Object::new();
            obj.set("c", head);
            head = ScriptValue::object(obj);
            links.note(&head);
        }
        let kept = ScriptValue::array(vec![ScriptValue::array(vec![])]);
        links.note(&kept);

        links.sweep();
        assert_eq!(links.held.len(), 11);
        drop(head);
        links.sweep();
        assert_eq!(links.held.len(), 1);
        assert_eq!(kept.to_json().unwrap(), json!([[]]));
    }

    #[test]
    fn test_truthiness() {
        assert!(!ScriptValue::Int(0).truthy());
        assert!(!ScriptValue::string("").truthy());
        assert!(!ScriptValue::Float(f64::NAN).truthy());
        assert!(ScriptValue::array(vec![]).truthy());
        assert!(ScriptValue::string("0").truthy());
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(3.0), "3");
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_float(f64::INFINITY), "Infinity");
        assert_eq!(format_float(f64::NAN), "NaN");
        assert_eq!(format_float(-0.0), "0");
        assert_eq!(format_float(1e20), "100000000000000000000");
        assert_eq!(format_float(-9.5e18), "-9500000000000000000");
        assert_eq!(format_float(1e21), "1e+21");
        assert_eq!(format_float(2.5e30), "2.5e+30");
    }

    #[test]
    fn test_object_set_overwrites_in_place() {
        let mut obj = Object::new();
        obj.set("a", ScriptValue::Int(1));
        obj.set("b", ScriptValue::Int(2));
        obj.set("a", ScriptValue::Int(3));
        let keys: Vec<_> = obj.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(matches!(obj.get("a"), Some(ScriptValue::Int(3))));
    }
}
