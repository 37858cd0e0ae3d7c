//! Collection reconciler
//!
//! Data sources and sub-resource sets: page through a query, let match
//! plug-ins claim or rewrite objects, map each survivor through the response
//! mapper and write the listing back into the tree.

use super::executor::ActionExecutor;
use super::response::{MappingRegistry, ResponseMapper};
use super::schema::Schema;
use super::tree::{AttrValue, Block, ResourceData};
use super::wire::WireParams;
use crate::error::{EngineError, Result};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::future::Future;

// =============================================================================
// Pagination
// =============================================================================

/// How successive pages are requested
#[derive(Debug, Clone)]
pub enum PageStyle {
    /// `Limit` + `Offset`. The offset advances by the number of items
    /// received, or by one per page when `by_pages` is set.
    Offset {
        limit_param: String,
        offset_param: String,
        start: i64,
        by_pages: bool,
    },
    /// `MaxResults` + `NextToken`, the token read back from `token_field`
    Token {
        limit_param: String,
        token_param: String,
        token_field: String,
    },
}

/// A paged query over one action
#[derive(Debug, Clone)]
pub struct PageQuery {
    pub style: PageStyle,
    pub page_size: usize,
    /// Dotted path of the item array in each response
    pub items_path: String,
}

impl PageQuery {
    pub fn offset(limit_param: &str, offset_param: &str, page_size: usize) -> Self {
        Self {
            style: PageStyle::Offset {
                limit_param: limit_param.to_string(),
                offset_param: offset_param.to_string(),
                start: 0,
                by_pages: false,
            },
            page_size,
            items_path: String::new(),
        }
    }

    pub fn token(limit_param: &str, token_param: &str, page_size: usize) -> Self {
        Self {
            style: PageStyle::Token {
                limit_param: limit_param.to_string(),
                token_param: token_param.to_string(),
                token_field: token_param.to_string(),
            },
            page_size,
            items_path: String::new(),
        }
    }

    pub fn items_at(mut self, path: &str) -> Self {
        self.items_path = path.to_string();
        self
    }

    /// First offset and whether it counts pages instead of items
    pub fn starting_at(mut self, start: i64, by_pages: bool) -> Self {
        if let PageStyle::Offset {
            start: s,
            by_pages: b,
            ..
        } = &mut self.style
        {
            *s = start;
            *b = by_pages;
        }
        self
    }
}

/// Array at a dotted path, or nothing
pub fn items_at(response: &Value, path: &str) -> Vec<Value> {
    if path.is_empty() {
        return response.as_array().cloned().unwrap_or_default();
    }
    let mut current = response;
    for part in path.split('.') {
        current = match current.get(part) {
            Some(v) => v,
            None => return vec![],
        };
    }
    current.as_array().cloned().unwrap_or_default()
}

/// Run `fetch` page after page and concatenate the items.
///
/// Stops on a short or empty page, or when a token query gets no next token.
pub async fn page_query<F, Fut>(base: &WireParams, query: &PageQuery, mut fetch: F) -> Result<Vec<Value>>
where
    F: FnMut(WireParams) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let mut all_items = Vec::new();
    let mut offset = match &query.style {
        PageStyle::Offset { start, .. } => *start,
        PageStyle::Token { .. } => 0,
    };
    let mut token: Option<String> = None;
    let mut page = 0usize;

    loop {
        let mut params = base.clone();
        match &query.style {
            PageStyle::Offset {
                limit_param,
                offset_param,
                ..
            } => {
                params.insert(limit_param.clone(), Value::from(query.page_size as i64));
                params.insert(offset_param.clone(), Value::from(offset));
            }
            PageStyle::Token {
                limit_param,
                token_param,
                ..
            } => {
                params.insert(limit_param.clone(), Value::from(query.page_size as i64));
                if let Some(t) = &token {
                    params.insert(token_param.clone(), Value::String(t.clone()));
                }
            }
        }

        let response = fetch(params).await?;
        let items = items_at(&response, &query.items_path);
        let received = items.len();
        all_items.extend(items);
        page += 1;
        tracing::debug!(page, received, total = all_items.len(), "fetched page");

        if received == 0 || received < query.page_size {
            break;
        }

        match &query.style {
            PageStyle::Offset { by_pages, .. } => {
                offset += if *by_pages { 1 } else { received as i64 };
            }
            PageStyle::Token { token_field, .. } => {
                token = response
                    .get(token_field)
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string);
                if token.is_none() {
                    break;
                }
            }
        }
    }

    Ok(all_items)
}

/// [`page_query`] against one executor action
pub async fn page_action<E>(executor: &E, action: &str, base: &WireParams, query: &PageQuery) -> Result<Vec<Value>>
where
    E: ActionExecutor + ?Sized,
{
    page_query(base, query, |params| async move {
        executor
            .execute(action, &params)
            .await
            .map_err(|e| EngineError::from_action(action, "", e))
    })
    .await
}

// =============================================================================
// Match plug-ins
// =============================================================================

/// What a plug-in decided about one remote object
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// The plug-in's input is absent; the object passes untouched
    Unclaimed,
    Keep,
    Replace(Value),
    Drop,
}

/// Claims, rewrites or drops remote objects before they are mapped
pub trait MatchPlugin: Send + Sync {
    fn check(&self, data: &ResourceData, object: &Value) -> MatchOutcome;
}

impl<F> MatchPlugin for F
where
    F: Fn(&ResourceData, &Value) -> MatchOutcome + Send + Sync,
{
    fn check(&self, data: &ResourceData, object: &Value) -> MatchOutcome {
        self(data, object)
    }
}

/// Keep objects whose `wire_field` is listed in the `input` attribute
pub struct IdsMatch {
    pub input: String,
    pub wire_field: String,
}

impl IdsMatch {
    pub fn new(input: &str, wire_field: &str) -> Self {
        Self {
            input: input.to_string(),
            wire_field: wire_field.to_string(),
        }
    }
}

impl MatchPlugin for IdsMatch {
    fn check(&self, data: &ResourceData, object: &Value) -> MatchOutcome {
        let Some(ids) = data.get_ok(&self.input).and_then(AttrValue::as_list) else {
            return MatchOutcome::Unclaimed;
        };
        let id = object.get(&self.wire_field).and_then(Value::as_str);
        match id {
            Some(id) if ids.iter().any(|v| v.as_str() == Some(id)) => MatchOutcome::Keep,
            _ => MatchOutcome::Drop,
        }
    }
}

// =============================================================================
// Listing
// =============================================================================

/// Where a data source's listing lives and how its elements are keyed
pub struct ListingSpec<'a> {
    pub element_schema: &'a Schema,
    pub mappings: &'a MappingRegistry,
    /// Element attribute holding the identifier
    pub id_attr: &'a str,
    /// Element attribute `name_regex` filters on
    pub name_attr: Option<&'a str>,
    /// Attribute receiving the listing
    pub listing_attr: &'a str,
}

/// Build the listing from `objects` and write `ids`, `total_count`, the
/// listing and the data source identifier into `data`
pub fn reconcile_listing(
    data: &mut ResourceData,
    objects: Vec<Value>,
    layout: &ListingSpec<'_>,
    plugins: &[&dyn MatchPlugin],
) -> Result<Vec<Block>> {
    let name_filter = match (layout.name_attr, data.get_str("name_regex")) {
        (Some(_), Some(pattern)) if !pattern.is_empty() => {
            Some(Regex::new(pattern).map_err(|e| EngineError::mapping("name_regex", e.to_string()))?)
        }
        _ => None,
    };

    let mapper = ResponseMapper::new(layout.element_schema, layout.mappings);
    let mut elements = Vec::new();

    'objects: for mut object in objects {
        for plugin in plugins {
            match plugin.check(data, &object) {
                MatchOutcome::Unclaimed | MatchOutcome::Keep => {}
                MatchOutcome::Replace(replacement) => object = replacement,
                MatchOutcome::Drop => continue 'objects,
            }
        }

        let element = mapper.map_block(&object)?;

        if let (Some(re), Some(name_attr)) = (&name_filter, layout.name_attr) {
            let name = element.get(name_attr).and_then(AttrValue::as_str).unwrap_or("");
            if !re.is_match(name) {
                continue;
            }
        }
        elements.push(element);
    }

    let ids: Vec<String> = elements
        .iter()
        .filter_map(|e| e.get(layout.id_attr).and_then(AttrValue::as_str))
        .map(str::to_string)
        .collect();

    data.set("ids", AttrValue::List(ids.iter().cloned().map(AttrValue::String).collect()));
    data.set("total_count", AttrValue::Int(elements.len() as i64));
    data.set(
        layout.listing_attr,
        AttrValue::List(elements.iter().cloned().map(AttrValue::Block).collect()),
    );
    data.set_id(hash_ids(&ids));

    if let Some(path) = data.get_str("output_file").filter(|p| !p.is_empty()) {
        write_listing(path, &elements)?;
    }

    tracing::info!(count = elements.len(), listing = layout.listing_attr, "listing reconciled");
    Ok(elements)
}

/// Stable identifier for a set of ids
pub fn hash_ids(ids: &[String]) -> String {
    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

fn write_listing(path: &str, elements: &[Block]) -> Result<()> {
    let listing: Vec<Value> = elements
        .iter()
        .map(|e| AttrValue::Block(e.clone()).to_json())
        .collect();
    let content = serde_json::to_string_pretty(&listing).unwrap_or_else(|_| "[]".to_string());
    std::fs::write(path, content).map_err(|source| EngineError::Output {
        path: path.to_string(),
        source,
    })
}
