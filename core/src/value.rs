use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A property value on a node or relationship.
///
/// Untagged so that property bags and constraint literals read straight
/// from plain JSON (`1`, `2.5`, `"x"`, `[..]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<PropertyValue>),
}

pub type Properties = BTreeMap<String, PropertyValue>;

impl PropertyValue {
    /// Numeric view. Integers widen to f64; everything else is None.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(i) => Some(*i as f64),
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Equality with numeric widening, so `1` matches `1.0`.
    pub fn loosely_equals(&self, other: &PropertyValue) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Ordering between comparable values: numbers with numbers, strings with
    /// strings, bools with bools. Anything else is incomparable.
    pub fn compare(&self, other: &PropertyValue) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.partial_cmp(&b);
        }
        match (self, other) {
            (PropertyValue::String(a), PropertyValue::String(b)) => Some(a.cmp(b)),
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Flatten a value into its grouping keys: lists contribute each element,
    /// scalars contribute themselves, null contributes nothing.
    pub fn group_keys(&self) -> Vec<String> {
        match self {
            PropertyValue::Null => Vec::new(),
            PropertyValue::List(items) => items.iter().flat_map(|v| v.group_keys()).collect(),
            PropertyValue::String(s) => vec![s.clone()],
            other => vec![other.to_literal()],
        }
    }

    /// Render as a declarative-query literal.
    pub fn to_literal(&self) -> String {
        match self {
            PropertyValue::Null => "null".to_string(),
            PropertyValue::Bool(b) => b.to_string(),
            PropertyValue::Int(i) => i.to_string(),
            PropertyValue::Float(f) => f.to_string(),
            PropertyValue::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            PropertyValue::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.to_literal()).collect();
                format!("[{}]", inner.join(", "))
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Int(i)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        PropertyValue::Float(f)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}
