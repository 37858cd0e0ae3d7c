//! Transform registry
//!
//! Per-field rules consulted by the request builder. Resource code supplies
//! them; the engine only checks that every rule points at a real attribute.

use super::schema::{AttrKind, Schema};
use super::tree::{AttrValue, ResourceData};
use super::wire::{push_filter, WireParams};
use crate::error::{EngineError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// How a list, set or block attribute is expanded on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    /// `Name.1`, `Name.2` (blocks: `Name.1.Sub`)
    Indexed,
    /// `Filter.N.Name` + `Filter.N.Value.M`
    Filter,
    /// First block element only, `Name.Sub`
    Composite,
    /// Parallel arrays per sub-field, `SubA.1`, `SubB.1`, `SubA.2`
    FanOut,
}

/// Produces the value to send instead of the declared one. `None` skips it.
pub type ValueFn = Arc<dyn Fn(&ResourceData, &AttrValue) -> Result<Option<AttrValue>> + Send + Sync>;

/// Emits any number of wire keys for one attribute and returns the next
/// running index
pub type FieldFn = Arc<dyn Fn(FieldEmit<'_>) -> Result<usize> + Send + Sync>;

/// Everything a field-emission function gets to see
pub struct FieldEmit<'a> {
    pub data: &'a ResourceData,
    pub name: &'a str,
    pub wire_name: &'a str,
    pub value: &'a AttrValue,
    pub params: &'a mut WireParams,
    /// Running index shared by all filter-style fields
    pub index: usize,
}

/// Rule for one attribute path
#[derive(Clone, Default)]
pub struct FieldRule {
    pub rename: Option<String>,
    pub ignore: bool,
    pub force_update: bool,
    pub value_fn: Option<ValueFn>,
    pub field_fn: Option<FieldFn>,
    pub list_mode: Option<ListMode>,
    /// Filter name when `list_mode` is `Filter` (default: kebab-case name)
    pub filter_name: Option<String>,
}

impl fmt::Debug for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRule")
            .field("rename", &self.rename)
            .field("ignore", &self.ignore)
            .field("force_update", &self.force_update)
            .field("value_fn", &self.value_fn.is_some())
            .field("field_fn", &self.field_fn.is_some())
            .field("list_mode", &self.list_mode)
            .field("filter_name", &self.filter_name)
            .finish()
    }
}

impl FieldRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rename(wire_name: &str) -> Self {
        Self {
            rename: Some(wire_name.to_string()),
            ..Self::default()
        }
    }

    pub fn ignored() -> Self {
        Self {
            ignore: true,
            ..Self::default()
        }
    }

    pub fn with_rename(mut self, wire_name: &str) -> Self {
        self.rename = Some(wire_name.to_string());
        self
    }

    pub fn force_update(mut self) -> Self {
        self.force_update = true;
        self
    }

    pub fn mode(mut self, mode: ListMode) -> Self {
        self.list_mode = Some(mode);
        self
    }

    pub fn filter(mut self, name: &str) -> Self {
        self.list_mode = Some(ListMode::Filter);
        self.filter_name = Some(name.to_string());
        self
    }

    pub fn value_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResourceData, &AttrValue) -> Result<Option<AttrValue>> + Send + Sync + 'static,
    {
        self.value_fn = Some(Arc::new(f));
        self
    }

    pub fn field_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(FieldEmit<'_>) -> Result<usize> + Send + Sync + 'static,
    {
        self.field_fn = Some(Arc::new(f));
        self
    }
}

/// Rules keyed by attribute path (`name` or `parent.child`)
#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    rules: BTreeMap<String, FieldRule>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, path: &str, rule: FieldRule) -> Self {
        self.rules.insert(path.to_string(), rule);
        self
    }

    pub fn insert(&mut self, path: &str, rule: FieldRule) {
        self.rules.insert(path.to_string(), rule);
    }

    pub fn get(&self, path: &str) -> Option<&FieldRule> {
        self.rules.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Only emit the listed attributes; everything else in the schema is
    /// ignored. Used to restrict a call descriptor to a subset of fields.
    pub fn only(mut self, schema: &Schema, names: &[&str]) -> Self {
        for attr in schema.attributes() {
            if !names.contains(&attr.name.as_str()) {
                self.rules.entry(attr.name.clone()).or_default().ignore = true;
            }
        }
        self
    }

    /// Every rule must point at an attribute, and its mode must fit the type.
    /// Members of a block only support `ignore` and `rename`.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        for (path, rule) in &self.rules {
            let Some(attr) = schema.resolve(path) else {
                return Err(EngineError::mapping(path, "rule references an attribute absent from the schema"));
            };
            if path.contains('.') {
                if let Some(feature) = nested_unsupported(rule) {
                    return Err(EngineError::mapping(
                        path,
                        format!("{} is not supported below a block, use a field function on the parent", feature),
                    ));
                }
            }
            match (rule.list_mode, &attr.kind) {
                (None, _) | (Some(ListMode::Indexed), _) => {}
                (Some(ListMode::Filter), AttrKind::List(_) | AttrKind::Set(_) | AttrKind::Scalar(_)) => {}
                (Some(ListMode::Composite | ListMode::FanOut), AttrKind::Block { .. }) => {}
                (Some(mode), kind) => {
                    return Err(EngineError::mapping(
                        path,
                        format!("list mode {:?} does not apply to {:?}", mode, kind),
                    ))
                }
            }
        }
        Ok(())
    }
}

fn nested_unsupported(rule: &FieldRule) -> Option<&'static str> {
    if rule.force_update {
        Some("force_update")
    } else if rule.value_fn.is_some() {
        Some("a value function")
    } else if rule.field_fn.is_some() {
        Some("a field function")
    } else if rule.list_mode.is_some() {
        Some("a list mode")
    } else {
        None
    }
}

// =============================================================================
// Stock field-emission functions
// =============================================================================

/// Explode a map into key/value pairs using `{n}` templates, e.g.
/// `("Tag.{n}.Key", "Tag.{n}.Value")` or `("Key_{n}", "Value_{n}")`.
/// Pairs are numbered from 1 in key order.
pub fn key_value_pairs(key_template: &str, value_template: &str) -> FieldFn {
    let key_template = key_template.to_string();
    let value_template = value_template.to_string();
    Arc::new(move |emit: FieldEmit<'_>| {
        let Some(map) = emit.value.as_block() else {
            return Err(EngineError::mapping(emit.name, "key/value expansion needs a map value"));
        };
        for (n, (k, v)) in map.iter().enumerate() {
            let n = (n + 1).to_string();
            let Some(wire) = v.to_wire() else {
                return Err(EngineError::mapping(emit.name, format!("map value for `{}` is not a scalar", k)));
            };
            emit.params.insert(key_template.replace("{n}", &n), Value::String(k.clone()));
            emit.params.insert(value_template.replace("{n}", &n), wire);
        }
        Ok(emit.index)
    })
}

/// Turn a tag map into `Filter.N.Name = tag:<key>` filters, continuing the
/// running filter index
pub fn tag_filters() -> FieldFn {
    Arc::new(|emit: FieldEmit<'_>| {
        let Some(map) = emit.value.as_block() else {
            return Err(EngineError::mapping(emit.name, "tag filters need a map value"));
        };
        let mut index = emit.index;
        for (k, v) in map {
            let Some(wire) = v.to_wire() else {
                continue;
            };
            push_filter(emit.params, index, &format!("tag:{}", k), &[wire]);
            index += 1;
        }
        Ok(index)
    })
}
