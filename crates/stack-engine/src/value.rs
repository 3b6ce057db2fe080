//! Declared property values and references to other resources' outputs.
//!
//! A declared property is a [`Value`]. Most values are plain data; a
//! [`Value::Ref`] names an output of another resource (for example the id of
//! a pulled image) that only exists once that resource is realized. Resolving
//! a value turns it into plain JSON once every reference it contains is known.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display};

use crate::error::DeclarationError;

/// Resolved property bag handed to adapters and recorded in observed state.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Values produced by a realized resource (`id`, `name`, ...).
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// A reference to `resource.output`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OutputRef {
    pub resource: String,
    pub output: String,
}

impl OutputRef {
    pub fn new(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            output: output.into(),
        }
    }
}

impl Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.output)
    }
}

impl TryFrom<String> for OutputRef {
    type Error = DeclarationError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        match raw.rsplit_once('.') {
            Some((resource, output)) if !resource.is_empty() && !output.is_empty() => {
                Ok(Self::new(resource, output))
            }
            _ => Err(DeclarationError::BadReference(raw)),
        }
    }
}

impl From<OutputRef> for String {
    fn from(r: OutputRef) -> Self {
        r.to_string()
    }
}

/// A declared property value.
///
/// Serialized untagged, so a declaration reads naturally in YAML; a reference
/// is written as `{ "$ref": "<resource>.<output>" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    Ref {
        #[serde(rename = "$ref")]
        target: OutputRef,
    },
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn reference(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Value::Ref {
            target: OutputRef::new(resource, output),
        }
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Every reference contained in this value, depth first.
    pub fn references(&self) -> Vec<&OutputRef> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a OutputRef>) {
        match self {
            Value::Ref { target } => out.push(target),
            Value::List(items) => items.iter().for_each(|v| v.collect_refs(out)),
            Value::Map(entries) => entries.values().for_each(|v| v.collect_refs(out)),
            Value::Bool(_) | Value::Int(_) | Value::Str(_) => {}
        }
    }

    /// Resolve into plain JSON, looking every reference up with `lookup`.
    ///
    /// Returns the first reference `lookup` could not answer.
    pub fn resolve_with<F>(&self, lookup: &mut F) -> Result<serde_json::Value, OutputRef>
    where
        F: FnMut(&OutputRef) -> Option<serde_json::Value>,
    {
        Ok(match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Ref { target } => lookup(target).ok_or_else(|| target.clone())?,
            Value::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| v.resolve_with(lookup))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(entries) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in entries {
                    obj.insert(k.clone(), v.resolve_with(lookup)?);
                }
                serde_json::Value::Object(obj)
            }
        })
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u16> for Value {
    fn from(i: u16) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<OutputRef> for Value {
    fn from(target: OutputRef) -> Self {
        Value::Ref { target }
    }
}
