//! Template parameter trees handed to components at construction.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{SerializeError, SerializeResult};

/// One node of a merged template: a text value plus named children.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParamNode {
    value: String,
    children: BTreeMap<String, ParamNode>,
}

impl ParamNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leaf(value: impl Into<String>) -> Self {
        Self { value: value.into(), children: BTreeMap::new() }
    }

    pub fn with_child(mut self, name: impl Into<String>, child: ParamNode) -> Self {
        self.children.insert(name.into(), child);
        self
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn child(&self, name: &str) -> Option<&ParamNode> {
        self.children.get(name)
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &ParamNode)> {
        self.children.iter().map(|(name, child)| (name.as_str(), child))
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty() && self.children.is_empty()
    }

    /// Parses the value of child `name`, if present.
    pub fn parse_child<T: FromStr>(&self, name: &str) -> SerializeResult<Option<T>> {
        let Some(child) = self.child(name) else {
            return Ok(None);
        };
        child.value.trim().parse().map(Some).map_err(|_| SerializeError::InvalidTemplateParam {
            name: name.to_string(),
            value: child.value.clone(),
        })
    }

    /// Overlays `other` onto `self`: non-empty values replace, children merge
    /// recursively.
    pub fn merge(&mut self, other: &ParamNode) {
        if !other.value.is_empty() {
            self.value.clone_from(&other.value);
        }
        for (name, child) in &other.children {
            self.children.entry(name.clone()).or_default().merge(child);
        }
    }

    /// Objects become children, scalars become values, `null` is empty.
    pub fn from_json(json: &Value) -> Self {
        match json {
            Value::Null => Self::new(),
            Value::Bool(value) => Self::leaf(value.to_string()),
            Value::Number(value) => Self::leaf(value.to_string()),
            Value::String(value) => Self::leaf(value.clone()),
            Value::Array(items) => Self {
                value: String::new(),
                children: items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| (index.to_string(), Self::from_json(item)))
                    .collect(),
            },
            Value::Object(map) => Self {
                value: String::new(),
                children: map
                    .iter()
                    .map(|(name, item)| (name.clone(), Self::from_json(item)))
                    .collect(),
            },
        }
    }

    /// Children as `<name>value...</name>` in name order.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        for (name, child) in &self.children {
            let _ = write!(out, "<{name}>{}", child.value);
            child.write_xml(out);
            let _ = write!(out, "</{name}>");
        }
    }
}
