//! Response mapper
//!
//! Walks a remote object and writes matching leaves back into the attribute
//! tree. Remote objects have no fixed shape, so every step is defensive:
//! unknown fields are dropped and values that cannot be coerced to the
//! declared type are skipped.

use super::schema::{to_snake_case, AttrKind, AttrMode, ScalarType, Schema};
use super::tree::{AttrValue, Block, ResourceData};
use crate::error::{EngineError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// How much of the tree a read may overwrite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Refresh: overwrite every attribute present in the response
    Full,
    /// Post-update read: only computed attributes (and unset optional+computed ones)
    Partial,
}

/// Transforms a wire value before coercion. `None` drops the field.
pub type ResponseFn = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Override for one wire field (`Field` or `Parent.Field`)
#[derive(Clone, Default)]
pub struct FieldMapping {
    pub target: Option<String>,
    /// Wrap the wire value into a single-element list
    pub wrap: bool,
    pub transform: Option<ResponseFn>,
    pub ignore: bool,
}

impl fmt::Debug for FieldMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldMapping")
            .field("target", &self.target)
            .field("wrap", &self.wrap)
            .field("transform", &self.transform.is_some())
            .field("ignore", &self.ignore)
            .finish()
    }
}

impl FieldMapping {
    pub fn target(name: &str) -> Self {
        Self {
            target: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn ignored() -> Self {
        Self {
            ignore: true,
            ..Self::default()
        }
    }

    pub fn wrapped(mut self) -> Self {
        self.wrap = true;
        self
    }

    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(f));
        self
    }
}

/// Routes the elements of a wire array by a discriminator: the primary
/// element's fields land on the root, the rest in a repeated block.
#[derive(Debug, Clone)]
pub struct SplitRule {
    pub wire_field: String,
    pub discriminator: String,
    pub primary_value: String,
    /// Prefix for attributes filled from the primary element
    pub primary_prefix: String,
    pub extension_attr: String,
}

/// Response-side overrides for one resource
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    fields: BTreeMap<String, FieldMapping>,
    splits: Vec<SplitRule>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, wire_path: &str, mapping: FieldMapping) -> Self {
        self.fields.insert(wire_path.to_string(), mapping);
        self
    }

    pub fn split(mut self, rule: SplitRule) -> Self {
        self.splits.push(rule);
        self
    }

    fn validate(&self, schema: &Schema) -> Result<()> {
        for (path, mapping) in &self.fields {
            if path.contains('.') {
                continue;
            }
            if let Some(target) = &mapping.target {
                if schema.get(target).is_none() {
                    return Err(EngineError::mapping(
                        path,
                        format!("mapping targets `{}`, which is absent from the schema", target),
                    ));
                }
            }
        }
        for split in &self.splits {
            match schema.get(&split.extension_attr).map(|a| &a.kind) {
                Some(AttrKind::Block { .. }) => {}
                _ => {
                    return Err(EngineError::mapping(
                        &split.wire_field,
                        format!("split target `{}` must be a block attribute", split.extension_attr),
                    ))
                }
            }
        }
        Ok(())
    }
}

/// Writes remote objects into the tree
pub struct ResponseMapper<'a> {
    schema: &'a Schema,
    mappings: &'a MappingRegistry,
    mode: ReadMode,
}

impl<'a> ResponseMapper<'a> {
    pub fn new(schema: &'a Schema, mappings: &'a MappingRegistry) -> Self {
        Self {
            schema,
            mappings,
            mode: ReadMode::Full,
        }
    }

    pub fn mode(mut self, mode: ReadMode) -> Self {
        self.mode = mode;
        self
    }

    /// Map `remote` and write the result into `data` according to the read mode
    pub fn apply(&self, remote: &Value, data: &mut ResourceData) -> Result<()> {
        let block = self.map_block(remote)?;
        for (name, value) in block {
            let Some(attr) = self.schema.get(&name) else {
                continue;
            };
            let write = match (attr.mode, self.mode) {
                (AttrMode::Computed, _) => true,
                (_, ReadMode::Full) => true,
                (AttrMode::OptionalComputed, ReadMode::Partial) => data.get_ok(&name).is_none(),
                (_, ReadMode::Partial) => false,
            };
            if write {
                data.set(&name, value);
            } else {
                tracing::trace!(attribute = %name, "keep user value on partial read");
            }
        }
        Ok(())
    }

    /// Map a remote object into a detached block (no read-mode filtering)
    pub fn map_block(&self, remote: &Value) -> Result<Block> {
        self.mappings.validate(self.schema)?;

        let mut block = self.map_object(remote, self.schema, "", "")?;

        for split in &self.mappings.splits {
            let Some(items) = remote.get(&split.wire_field).and_then(Value::as_array) else {
                continue;
            };
            let mut extensions = Vec::new();
            for item in items {
                let is_primary = item
                    .get(&split.discriminator)
                    .and_then(Value::as_str)
                    .map(|d| d == split.primary_value)
                    .unwrap_or(false);
                if is_primary {
                    let primary = self.map_object(item, self.schema, &split.wire_field, &split.primary_prefix)?;
                    block.extend(primary);
                } else {
                    extensions.push(item.clone());
                }
            }
            if let Some(attr) = self.schema.get(&split.extension_attr) {
                if let Some(v) = self.coerce(&split.wire_field, &attr.kind, &Value::Array(extensions))? {
                    block.insert(split.extension_attr.clone(), v);
                }
            }
        }

        Ok(block)
    }

    fn map_object(&self, obj: &Value, schema: &Schema, wire_prefix: &str, name_prefix: &str) -> Result<Block> {
        let mut block = Block::new();
        let Some(map) = obj.as_object() else {
            tracing::trace!(prefix = %wire_prefix, "remote value is not an object, skipping");
            return Ok(block);
        };

        for (key, raw) in map {
            if wire_prefix.is_empty() && self.mappings.splits.iter().any(|s| &s.wire_field == key) {
                continue;
            }
            let path = if wire_prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", wire_prefix, key)
            };
            let mapping = self.mappings.fields.get(&path);
            if mapping.map(|m| m.ignore).unwrap_or(false) {
                continue;
            }

            let target = mapping
                .and_then(|m| m.target.clone())
                .unwrap_or_else(|| format!("{}{}", name_prefix, to_snake_case(key)));
            let Some(attr) = schema.get(&target) else {
                tracing::trace!(field = %path, "no attribute for wire field, dropped");
                continue;
            };

            let mut value = match mapping.and_then(|m| m.transform.as_ref()) {
                Some(f) => match f(raw) {
                    Some(v) => v,
                    None => continue,
                },
                None => raw.clone(),
            };
            if mapping.map(|m| m.wrap).unwrap_or(false) {
                value = Value::Array(vec![value]);
            }

            if let Some(v) = self.coerce(&path, &attr.kind, &value)? {
                block.insert(target, v);
            }
        }
        Ok(block)
    }

    fn coerce(&self, path: &str, kind: &AttrKind, value: &Value) -> Result<Option<AttrValue>> {
        if value.is_null() {
            return Ok(None);
        }
        let coerced = match kind {
            AttrKind::Scalar(ty) => coerce_scalar(*ty, value),
            AttrKind::List(ty) | AttrKind::Set(ty) => {
                let items: Vec<&Value> = match value {
                    Value::Array(items) => items.iter().collect(),
                    single => vec![single],
                };
                Some(AttrValue::List(
                    items.into_iter().filter_map(|v| coerce_scalar(*ty, v)).collect(),
                ))
            }
            AttrKind::Map(ty) => coerce_map(*ty, value),
            AttrKind::Block { schema, .. } => {
                let items: Vec<&Value> = match value {
                    Value::Array(items) => items.iter().collect(),
                    Value::Object(_) => vec![value],
                    _ => vec![],
                };
                let mut blocks = Vec::with_capacity(items.len());
                for item in items {
                    blocks.push(AttrValue::Block(self.map_object(item, schema, path, "")?));
                }
                Some(AttrValue::List(blocks))
            }
        };
        if coerced.is_none() {
            tracing::debug!(field = %path, "wire value does not coerce to {:?}, skipped", kind_name(kind));
        }
        Ok(coerced)
    }
}

fn kind_name(kind: &AttrKind) -> &'static str {
    match kind {
        AttrKind::Scalar(_) => "scalar",
        AttrKind::List(_) => "list",
        AttrKind::Set(_) => "set",
        AttrKind::Map(_) => "map",
        AttrKind::Block { .. } => "block",
    }
}

/// Coerce one wire scalar to the declared type
pub fn coerce_scalar(ty: ScalarType, value: &Value) -> Option<AttrValue> {
    match (ty, value) {
        (ScalarType::String, Value::String(s)) => Some(AttrValue::String(s.clone())),
        (ScalarType::String, Value::Number(n)) => Some(AttrValue::String(n.to_string())),
        (ScalarType::String, Value::Bool(b)) => Some(AttrValue::String(b.to_string())),
        (ScalarType::Int, Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(AttrValue::Int),
        (ScalarType::Int, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(AttrValue::Int),
        (ScalarType::Float, Value::Number(n)) => n.as_f64().map(AttrValue::Float),
        (ScalarType::Float, Value::String(s)) => s.trim().parse::<f64>().ok().map(AttrValue::Float),
        (ScalarType::Bool, Value::Bool(b)) => Some(AttrValue::Bool(*b)),
        (ScalarType::Bool, Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(AttrValue::Bool(true)),
            "false" => Some(AttrValue::Bool(false)),
            _ => None,
        },
        (ScalarType::Bool, Value::Number(n)) => n.as_i64().map(|i| AttrValue::Bool(i != 0)),
        _ => None,
    }
}

/// Maps arrive either as objects or as `[{"Key": .., "Value": ..}]` lists
fn coerce_map(ty: ScalarType, value: &Value) -> Option<AttrValue> {
    let mut block = Block::new();
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if let Some(v) = coerce_scalar(ty, v) {
                    block.insert(k.clone(), v);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                let key = item
                    .get("Key")
                    .or_else(|| item.get("TagKey"))
                    .and_then(Value::as_str);
                let val = item.get("Value").or_else(|| item.get("TagValue"));
                if let (Some(k), Some(v)) = (key, val) {
                    if let Some(v) = coerce_scalar(ty, v) {
                        block.insert(k.to_string(), v);
                    }
                }
            }
        }
        _ => return None,
    }
    Some(AttrValue::Block(block))
}
