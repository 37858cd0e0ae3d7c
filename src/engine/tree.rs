//! Attribute tree
//!
//! [`ResourceData`] is the declarative state of one resource instance: the
//! values recorded after the last successful operation (`prior`) and the
//! current values being reconciled. It is the only thing that survives an
//! operation; wire maps and remote objects are transient.

use super::schema::{AttrKind, Schema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A block of attributes keyed by name
pub type Block = BTreeMap<String, AttrValue>;

/// A declarative value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<AttrValue>),
    /// A nested block or a map of scalars
    Block(Block),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttrValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Self::Block(block) => Some(block),
            _ => None,
        }
    }

    /// Zero values count as "not set", the way declarative configs treat them
    pub fn is_empty(&self) -> bool {
        match self {
            Self::String(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Block(block) => block.is_empty(),
            _ => false,
        }
    }

    /// Render a scalar as the JSON value sent on the wire
    pub fn to_wire(&self) -> Option<Value> {
        match self {
            Self::Bool(b) => Some(Value::Bool(*b)),
            Self::Int(n) => Some(Value::from(*n)),
            Self::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number),
            Self::String(s) => Some(Value::String(s.clone())),
            Self::List(_) | Self::Block(_) => None,
        }
    }

    /// Plain JSON rendering (used for output files and the CLI)
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<&str>> for AttrValue {
    fn from(items: Vec<&str>) -> Self {
        Self::List(items.into_iter().map(AttrValue::from).collect())
    }
}

/// Compare two values under a declared kind; sets ignore order
pub fn values_equal(kind: &AttrKind, a: Option<&AttrValue>, b: Option<&AttrValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), None) | (None, Some(x)) => x.is_empty(),
        (Some(x), Some(y)) => match (kind, x, y) {
            (AttrKind::Set(_), AttrValue::List(xs), AttrValue::List(ys)) => {
                let count = |items: &[AttrValue], v: &AttrValue| items.iter().filter(|i| *i == v).count();
                xs.len() == ys.len() && xs.iter().all(|v| count(xs, v) == count(ys, v))
            }
            _ => x == y,
        },
    }
}

/// Declarative state of one resource instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceData {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    prior: Block,
    #[serde(default)]
    values: Block,
}

impl ResourceData {
    /// A resource that has never been created
    pub fn new(values: Block) -> Self {
        Self {
            id: None,
            prior: Block::new(),
            values,
        }
    }

    /// An existing resource with its recorded state and the desired values
    pub fn existing(id: &str, prior: Block, values: Block) -> Self {
        Self {
            id: Some(id.to_string()),
            prior,
            values,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Identifier or empty string, for error context
    pub fn id_or_empty(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// Forget the identifier (the remote object is gone)
    pub fn clear_id(&mut self) {
        self.id = None;
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    /// Non-empty value only
    pub fn get_ok(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name).filter(|v| !v.is_empty())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttrValue::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(AttrValue::as_i64)
    }

    pub fn get_prior(&self, name: &str) -> Option<&AttrValue> {
        self.prior.get(name)
    }

    /// (recorded, current)
    pub fn get_change(&self, name: &str) -> (Option<&AttrValue>, Option<&AttrValue>) {
        (self.prior.get(name), self.values.get(name))
    }

    pub fn set(&mut self, name: &str, value: impl Into<AttrValue>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<AttrValue> {
        self.values.remove(name)
    }

    pub fn values(&self) -> &Block {
        &self.values
    }

    pub fn prior(&self) -> &Block {
        &self.prior
    }

    /// Plain comparison, sets included as ordered lists
    pub fn has_change(&self, name: &str) -> bool {
        !values_equal(&AttrKind::string(), self.prior.get(name), self.values.get(name))
    }

    /// Schema-aware comparison
    pub fn has_change_in(&self, schema: &Schema, name: &str) -> bool {
        match schema.get(name) {
            Some(attr) => !values_equal(&attr.kind, self.prior.get(name), self.values.get(name)),
            None => self.has_change(name),
        }
    }

    /// Names of attributes that changed and force replacement
    pub fn replacement_reasons(&self, schema: &Schema) -> Vec<String> {
        if self.is_new() {
            return vec![];
        }
        schema
            .force_new_attributes()
            .filter(|a| self.has_change_in(schema, &a.name))
            .map(|a| a.name.clone())
            .collect()
    }

    /// Record the current values as the new baseline
    pub fn commit(&mut self) {
        self.prior = self.values.clone();
    }

    pub fn to_json(&self) -> Value {
        let mut state = serde_json::Map::new();
        if let Some(id) = &self.id {
            state.insert("id".to_string(), Value::String(id.clone()));
        }
        for (k, v) in &self.values {
            state.insert(k.clone(), v.to_json());
        }
        Value::Object(state)
    }
}
