//! Schema descriptors
//!
//! A typed description of a resource's declarative attributes. Schemas are
//! either declared in Rust with the builder methods below or deserialized
//! from the embedded resource definitions (see `resource::registry`).

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/// Leaf scalar types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    String,
    Int,
    Float,
    Bool,
}

/// Shape of an attribute
#[derive(Debug, Clone, PartialEq)]
pub enum AttrKind {
    Scalar(ScalarType),
    List(ScalarType),
    Set(ScalarType),
    /// String-keyed map of scalars (tags)
    Map(ScalarType),
    /// Nested block; `max_items == Some(1)` means a single block
    Block { schema: Schema, max_items: Option<usize> },
}

impl AttrKind {
    pub fn string() -> Self {
        Self::Scalar(ScalarType::String)
    }

    pub fn int() -> Self {
        Self::Scalar(ScalarType::Int)
    }

    pub fn float() -> Self {
        Self::Scalar(ScalarType::Float)
    }

    pub fn bool() -> Self {
        Self::Scalar(ScalarType::Bool)
    }

    pub fn block(schema: Schema) -> Self {
        Self::Block {
            schema,
            max_items: None,
        }
    }

    pub fn single_block(schema: Schema) -> Self {
        Self::Block {
            schema,
            max_items: Some(1),
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Self::List(_) | Self::Set(_))
    }

    pub fn nested(&self) -> Option<&Schema> {
        match self {
            Self::Block { schema, .. } => Some(schema),
            _ => None,
        }
    }

    pub fn is_single_block(&self) -> bool {
        matches!(self, Self::Block { max_items: Some(1), .. })
    }
}

/// Who sets the attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrMode {
    Required,
    #[default]
    Optional,
    /// Only received from the remote side, never sent
    Computed,
    /// User may set it; the remote side fills it when unset
    OptionalComputed,
}

/// One declarative attribute
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub kind: AttrKind,
    pub mode: AttrMode,
    /// A change forces replacement instead of an in-place update
    pub force_new: bool,
}

impl Attribute {
    pub fn new(name: &str, kind: AttrKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            mode: AttrMode::Optional,
            force_new: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.mode = AttrMode::Required;
        self
    }

    pub fn computed(mut self) -> Self {
        self.mode = AttrMode::Computed;
        self
    }

    pub fn optional_computed(mut self) -> Self {
        self.mode = AttrMode::OptionalComputed;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn is_computed_only(&self) -> bool {
        self.mode == AttrMode::Computed
    }

    pub fn is_user_settable(&self) -> bool {
        self.mode != AttrMode::Computed
    }
}

/// Ordered set of attributes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    attributes: Vec<Attribute>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attr(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Resolve a dotted path (`system_disk.disk_type`) through nested blocks
    pub fn resolve(&self, path: &str) -> Option<&Attribute> {
        let mut parts = path.split('.');
        let mut current = self.get(parts.next()?)?;
        for part in parts {
            current = current.kind.nested()?.get(part)?;
        }
        Some(current)
    }

    pub fn force_new_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| a.force_new)
    }
}

// =============================================================================
// JSON definitions
// =============================================================================

/// Attribute as written in a resource definition file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub elem: Option<ScalarType>,
    #[serde(default)]
    pub mode: AttrMode,
    #[serde(default)]
    pub force_new: bool,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
}

impl TryFrom<&AttributeDef> for Attribute {
    type Error = EngineError;

    fn try_from(def: &AttributeDef) -> Result<Self> {
        let elem = || {
            def.elem.ok_or_else(|| {
                EngineError::mapping(&def.name, format!("type `{}` needs an `elem`", def.ty))
            })
        };
        let kind = match def.ty.as_str() {
            "string" => AttrKind::string(),
            "int" => AttrKind::int(),
            "float" => AttrKind::float(),
            "bool" => AttrKind::bool(),
            "list" => AttrKind::List(elem()?),
            "set" => AttrKind::Set(elem()?),
            "map" => AttrKind::Map(elem()?),
            "block" => AttrKind::Block {
                schema: Schema::try_from(def.attributes.as_slice())?,
                max_items: def.max_items,
            },
            other => {
                return Err(EngineError::mapping(
                    &def.name,
                    format!("unknown attribute type `{}`", other),
                ))
            }
        };
        Ok(Attribute {
            name: def.name.clone(),
            kind,
            mode: def.mode,
            force_new: def.force_new,
        })
    }
}

impl TryFrom<&[AttributeDef]> for Schema {
    type Error = EngineError;

    fn try_from(defs: &[AttributeDef]) -> Result<Self> {
        let attributes = defs
            .iter()
            .map(Attribute::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { attributes })
    }
}

impl From<&Attribute> for AttributeDef {
    fn from(attr: &Attribute) -> Self {
        let (ty, elem, max_items, attributes) = match &attr.kind {
            AttrKind::Scalar(s) => (scalar_name(*s), None, None, vec![]),
            AttrKind::List(s) => ("list", Some(*s), None, vec![]),
            AttrKind::Set(s) => ("set", Some(*s), None, vec![]),
            AttrKind::Map(s) => ("map", Some(*s), None, vec![]),
            AttrKind::Block { schema, max_items } => (
                "block",
                None,
                *max_items,
                schema.attributes().iter().map(AttributeDef::from).collect(),
            ),
        };
        Self {
            name: attr.name.clone(),
            ty: ty.to_string(),
            elem,
            mode: attr.mode,
            force_new: attr.force_new,
            max_items,
            attributes,
        }
    }
}

fn scalar_name(s: ScalarType) -> &'static str {
    match s {
        ScalarType::String => "string",
        ScalarType::Int => "int",
        ScalarType::Float => "float",
        ScalarType::Bool => "bool",
    }
}

// =============================================================================
// Naming
// =============================================================================

/// `band_width_share_id` -> `BandWidthShareId`
pub fn to_pascal_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// `BandWidthShareId` -> `band_width_share_id`
///
/// Runs of capitals stay together (`EIPId` -> `eip_id`).
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_ascii_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).map(|n| n.is_ascii_lowercase()).unwrap_or(false);
            let prev_upper = i > 0 && chars[i - 1].is_ascii_uppercase();
            if i > 0 && (prev_lower || (prev_upper && next_lower)) && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c == '-' || c == '.' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

/// `vpc_id` -> `vpc-id`, the default filter name
pub fn to_kebab_case(name: &str) -> String {
    name.replace('_', "-")
}
