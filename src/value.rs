//! Runtime values: what encoders read and decoders produce.
//!
//! Objects sit behind `Rc` because decoded graphs may be lazy: a field slot
//! holds a provider closure until first read, and the closure keeps the input
//! resource alive. Values are therefore single-threaded (`!Send`).
pub mod object;

use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use ordered_float::OrderedFloat;

pub use object::{Initializer, Object, ObjectBuilder, Slot, ValueProvider};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DictKey {
    Int(i64),
    String(String),
}

impl fmt::Display for DictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictKey::Int(i) => write!(f, "{i}"),
            DictKey::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for DictKey {
    fn from(s: &str) -> Self { DictKey::String(s.to_string()) }
}

impl From<String> for DictKey {
    fn from(s: String) -> Self { DictKey::String(s) }
}

impl From<i64> for DictKey {
    fn from(i: i64) -> Self { DictKey::Int(i) }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    String(String),
    List(Vec<Value>),
    Dict(IndexMap<DictKey, Value>),
    Object(Rc<Object>),
    Enum { class: String, case: Box<Value> },
    DateTime(DateTime<FixedOffset>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Object(_) => "object",
            Value::Enum { .. } => "enum",
            Value::DateTime(_) => "datetime",
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(xs) => Some(xs),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Rc<Object>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Untyped conversion, used for `mixed` and for discriminators that need
    /// to look at a raw decoded value.
    pub fn from_json(json: serde_json::Value) -> Value {
        use serde_json::Value as J;
        match json {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(b),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(OrderedFloat(n.as_f64().unwrap_or(f64::NAN))),
            },
            J::String(s) => Value::String(s),
            J::Array(xs) => Value::List(xs.into_iter().map(Value::from_json).collect()),
            J::Object(map) => Value::Dict(
                map.into_iter().map(|(k, v)| (DictKey::String(k), Value::from_json(v))).collect(),
            ),
        }
    }
}

// ------------------------------ Conversions ------------------------------- //

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self { Value::Int(i) }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self { Value::Int(i64::from(i)) }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self { Value::Float(OrderedFloat(f)) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::String(s.to_string()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::String(s) }
}

impl From<Vec<Value>> for Value {
    fn from(xs: Vec<Value>) -> Self { Value::List(xs) }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self { Value::Object(Rc::new(o)) }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(d: DateTime<FixedOffset>) -> Self { Value::DateTime(d) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

// ------------------------------- Tests ------------------------------------ //
