//! Resource Registry - Load resource definitions from JSON
//!
//! Resource definitions are embedded at compile time and parsed once on
//! first access.

use crate::engine::collection::PageQuery;
use crate::engine::schema::{AttributeDef, Schema};
use crate::error::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[include_str!("../resources/network.json")];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Resource,
    DataSource,
}

/// Paging parameters of the read action
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum PagingDef {
    Token {
        limit_param: String,
        token_param: String,
        page_size: usize,
    },
    Offset {
        limit_param: String,
        offset_param: String,
        page_size: usize,
        #[serde(default)]
        start: i64,
        #[serde(default)]
        by_pages: bool,
    },
}

/// Resource definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDef {
    pub display_name: String,
    pub kind: ResourceKind,
    pub service: String,
    pub read_action: String,
    /// Indexed parameter selecting objects by id (`Name.1`)
    pub id_param: String,
    pub response_path: String,
    pub id_field: String,
    pub name_field: String,
    /// Resource type of the tag service; no tag merge when absent
    #[serde(default)]
    pub tag_resource_type: Option<String>,
    #[serde(default)]
    pub paging: Option<PagingDef>,
    pub schema: Vec<AttributeDef>,
}

impl ResourceDef {
    pub fn schema(&self) -> Result<Schema> {
        Schema::try_from(self.schema.as_slice())
    }

    /// Paged query over the read action; a single large page when unpaged
    pub fn page_query(&self) -> PageQuery {
        let query = match &self.paging {
            Some(PagingDef::Token {
                limit_param,
                token_param,
                page_size,
            }) => PageQuery::token(limit_param, token_param, *page_size),
            Some(PagingDef::Offset {
                limit_param,
                offset_param,
                page_size,
                start,
                by_pages,
            }) => PageQuery::offset(limit_param, offset_param, *page_size).starting_at(*start, *by_pages),
            None => PageQuery::token("MaxResults", "NextToken", 1000),
        };
        query.items_at(&self.response_path)
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResourceConfig {
    #[serde(default)]
    pub resources: HashMap<String, ResourceDef>,
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<ResourceConfig> = OnceLock::new();

/// Get the resource registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static ResourceConfig {
    REGISTRY.get_or_init(|| {
        let mut final_config = ResourceConfig::default();

        for content in RESOURCE_FILES {
            match serde_json::from_str::<ResourceConfig>(content) {
                Ok(partial) => final_config.resources.extend(partial.resources),
                Err(e) => tracing::error!("Failed to parse embedded resource JSON: {}", e),
            }
        }

        final_config
    })
}

/// Get a resource definition by key
pub fn get_resource(key: &str) -> Option<&'static ResourceDef> {
    get_registry().resources.get(key)
}

/// All resource keys, sorted
pub fn get_all_resource_keys() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = get_registry()
        .resources
        .keys()
        .map(|s| s.as_str())
        .collect();
    keys.sort_unstable();
    keys
}
