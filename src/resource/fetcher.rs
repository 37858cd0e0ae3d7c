//! Resource Fetcher
//!
//! Reads remote objects for a resource definition: scope injection, paged
//! query, then the tag side query.

use super::registry::ResourceDef;
use crate::api::projects::{list_project_ids, LIST_PROJECTS_ACTION};
use crate::engine::collection::page_action;
use crate::engine::executor::ActionExecutor;
use crate::engine::scope::ProjectScope;
use crate::engine::tags::merge_tags;
use crate::engine::wire::{has_param, indexed_key, WireParams};
use crate::error::{EngineError, Result};
use serde_json::Value;

/// How widely a read looks for objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reach {
    /// Configured projects only
    Configured,
    /// Every project the account can see
    AllTenants,
}

/// Fetch all objects matching `params` (auto-paginate, tags merged)
pub async fn fetch_objects(
    executor: &dyn ActionExecutor,
    scope: &ProjectScope,
    def: &ResourceDef,
    mut params: WireParams,
    reach: Reach,
) -> Result<Vec<Value>> {
    match reach {
        Reach::Configured => scope.inject(&mut params),
        Reach::AllTenants if !has_param(&params, "ProjectId") => {
            let projects = list_project_ids(executor)
                .await
                .map_err(|source| EngineError::Fatal {
                    action: LIST_PROJECTS_ACTION.to_string(),
                    resource_id: String::new(),
                    source,
                })?;
            scope.inject_all_tenants(&projects, &mut params);
        }
        Reach::AllTenants => {}
    }

    let mut items = page_action(executor, &def.read_action, &params, &def.page_query()).await?;

    if let Some(resource_type) = &def.tag_resource_type {
        merge_tags(executor, resource_type, &def.id_field, &mut items).await?;
    }

    tracing::debug!(action = %def.read_action, count = items.len(), "fetched objects");
    Ok(items)
}

/// Fetch the object with identifier `id`, if it exists
pub async fn fetch_one(
    executor: &dyn ActionExecutor,
    scope: &ProjectScope,
    def: &ResourceDef,
    id: &str,
    project_id: Option<&str>,
    reach: Reach,
) -> Result<Option<Value>> {
    let mut params = WireParams::new();
    params.insert(indexed_key(&def.id_param, 1), Value::String(id.to_string()));
    if let Some(project) = project_id.filter(|p| !p.is_empty()) {
        params.insert(indexed_key("ProjectId", 1), Value::String(project.to_string()));
    }

    let items = match fetch_objects(executor, scope, def, params, reach).await {
        Ok(items) => items,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };

    Ok(items
        .into_iter()
        .find(|item| item.get(&def.id_field).and_then(Value::as_str) == Some(id)))
}

/// Extract a value from JSON using a dot-notation path
pub fn extract_json_value<'v>(item: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = item;

    for part in path.split('.') {
        current = if let Ok(idx) = part.parse::<usize>() {
            current.get(idx)?
        } else {
            current.get(part)?
        };
    }

    Some(current)
}
