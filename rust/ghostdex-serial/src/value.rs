//! The primitive shape accepted by every archiver.

use std::{collections::BTreeMap, fmt};

use ghostdex_common::{Result, error::Error};
use serde::{Deserialize, Serialize};

/// A storable value: scalars, ordered sequences and string-keyed maps, nested
/// arbitrarily. Anything richer goes through a [`Translator`](crate::Translator).
///
/// Integer arrays have their own variant so that the leaf encoding keeps them
/// apart from generic lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Ints(Vec<i64>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Builds a map from `(name, value)` pairs.
    pub fn map<I, S>(fields: I) -> Value
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Value::Map(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Ints(_) => "ints",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self, element: &str) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(unexpected(element, "bool", other)),
        }
    }

    pub fn as_int(&self, element: &str) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(unexpected(element, "int", other)),
        }
    }

    /// Reads a non-negative integer as `usize`.
    pub fn as_usize(&self, element: &str) -> Result<usize> {
        let i = self.as_int(element)?;
        usize::try_from(i)
            .map_err(|_| Error::invalid_format(element, format!("negative count {i}")))
    }

    pub fn as_str(&self, element: &str) -> Result<&str> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(unexpected(element, "string", other)),
        }
    }

    pub fn as_ints(&self, element: &str) -> Result<&[i64]> {
        match self {
            Value::Ints(v) => Ok(v),
            other => Err(unexpected(element, "ints", other)),
        }
    }

    pub fn as_list(&self, element: &str) -> Result<&[Value]> {
        match self {
            Value::List(v) => Ok(v),
            other => Err(unexpected(element, "list", other)),
        }
    }

    pub fn as_map(&self, element: &str) -> Result<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(unexpected(element, "map", other)),
        }
    }

    pub fn as_map_mut(&mut self, element: &str) -> Result<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(unexpected(element, "map", other)),
        }
    }

    /// Returns a required field of a map value.
    pub fn field(&self, name: &str) -> Result<&Value> {
        self.as_map(name)?
            .get(name)
            .ok_or_else(|| Error::invalid_format(name, "missing field"))
    }

    /// Returns an optional field of a map value; `Null` counts as absent.
    pub fn opt_field(&self, name: &str) -> Result<Option<&Value>> {
        Ok(self.as_map(name)?.get(name).filter(|v| !v.is_null()))
    }
}

#[cold]
fn unexpected(element: &str, expected: &str, actual: &Value) -> Error {
    Error::invalid_format(
        element,
        format!("expected {expected}, found {}", actual.type_name()),
    )
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Ints(v) => write!(f, "{v:?}"),
            Value::List(v) => {
                f.write_str("[")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(m) => {
                f.write_str("{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::Ints(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
