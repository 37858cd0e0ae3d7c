//! Tag merge and replacement
//!
//! Tags live in a separate service. After a primary read they are fetched in
//! one side query and merged into each remote object as a synthetic `Tags`
//! field, which the response mapper then treats like any other map.

use super::executor::ActionExecutor;
use super::orchestrator::CallDescriptor;
use super::tree::{AttrValue, Block};
use super::wire::{indexed_sub_key, WireParams};
use crate::error::{EngineError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const LIST_TAGS_ACTION: &str = "ListTagsByResourceIds";
pub const REPLACE_TAGS_ACTION: &str = "ReplaceResourcesTags";

/// Synthetic field the merged tags land in
pub const TAGS_FIELD: &str = "Tags";

/// Fetch tags for `objects` (keyed by `id_field`) and merge them in.
///
/// Objects without tags get an empty `Tags` object. A failed side query
/// fails the whole read.
pub async fn merge_tags(
    executor: &dyn ActionExecutor,
    resource_type: &str,
    id_field: &str,
    objects: &mut [Value],
) -> Result<()> {
    let ids: Vec<String> = objects
        .iter()
        .filter_map(|o| o.get(id_field).and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    if ids.is_empty() {
        return Ok(());
    }

    let mut params = WireParams::new();
    params.insert("ResourceType".to_string(), Value::String(resource_type.to_string()));
    params.insert("ResourceUuids".to_string(), Value::String(ids.join(",")));

    let response = executor
        .execute(LIST_TAGS_ACTION, &params)
        .await
        .map_err(|source| EngineError::Fatal {
            action: LIST_TAGS_ACTION.to_string(),
            resource_id: ids.join(","),
            source,
        })?;

    let mut by_resource: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
    for tag in response.get("TagSet").and_then(Value::as_array).into_iter().flatten() {
        let (Some(id), Some(key)) = (
            tag.get("ResourceUuid").and_then(Value::as_str),
            tag.get("TagKey").and_then(Value::as_str),
        ) else {
            continue;
        };
        let value = tag.get("TagValue").cloned().unwrap_or(Value::String(String::new()));
        by_resource
            .entry(id.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    for object in objects.iter_mut() {
        let Some(id) = object.get(id_field).and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let tags = by_resource.remove(&id).unwrap_or_default();
        if let Value::Object(map) = object {
            map.insert(TAGS_FIELD.to_string(), Value::Object(tags));
        }
    }
    tracing::debug!(resources = ids.len(), "merged tags");
    Ok(())
}

/// Call replacing every tag of one resource with `tags`
pub fn replace_tags_call<'h>(resource_type: &str, resource_id: &str, tags: Option<&Block>) -> CallDescriptor<'h> {
    let mut params = WireParams::new();
    params.insert("ResourceType".to_string(), Value::String(resource_type.to_string()));
    params.insert("ResourceUuids".to_string(), Value::String(resource_id.to_string()));
    if let Some(tags) = tags {
        for (n, (k, v)) in tags.iter().enumerate() {
            let value = match v {
                AttrValue::String(s) => s.clone(),
                other => other.to_json().to_string(),
            };
            params.insert(indexed_sub_key("ReplaceTags", n + 1, "Key"), Value::String(k.clone()));
            params.insert(indexed_sub_key("ReplaceTags", n + 1, "Value"), Value::String(value));
        }
    }
    CallDescriptor::new(REPLACE_TAGS_ACTION, params).no_dry_run()
}
