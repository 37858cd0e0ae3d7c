//! Project scope injection
//!
//! Queries only see objects in the projects they name. Reads add the
//! configured projects; existence checks on the delete path widen the scope
//! to every project the account can see so nothing is missed.

use super::wire::{has_param, indexed_key, WireParams};
use serde_json::Value;

const PROJECT_PARAM: &str = "ProjectId";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectScope {
    project_ids: Vec<String>,
}

impl ProjectScope {
    pub fn new(project_ids: Vec<String>) -> Self {
        Self { project_ids }
    }

    pub fn project_ids(&self) -> &[String] {
        &self.project_ids
    }

    /// Add `ProjectId.N` for the configured projects unless the query already
    /// carries a project condition
    pub fn inject(&self, params: &mut WireParams) {
        if has_param(params, PROJECT_PARAM) {
            return;
        }
        push_projects(params, &self.project_ids);
    }

    /// Add the configured projects followed by every other project of the
    /// account (`account_projects`, as listed by the caller)
    pub fn inject_all_tenants(&self, account_projects: &[String], params: &mut WireParams) {
        if has_param(params, PROJECT_PARAM) {
            return;
        }
        tracing::debug!(count = account_projects.len(), "widening query to all account projects");

        let mut ids = self.project_ids.clone();
        for id in account_projects {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        push_projects(params, &ids);
    }
}

fn push_projects(params: &mut WireParams, ids: &[String]) {
    for (i, id) in ids.iter().enumerate() {
        params.insert(indexed_key(PROJECT_PARAM, i + 1), Value::String(id.clone()));
    }
}
