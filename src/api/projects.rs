//! Account projects
//!
//! Functions for listing the projects visible to the account.

use crate::engine::executor::ActionExecutor;
use crate::engine::wire::WireParams;
use crate::error::ActionError;
use serde_json::Value;

pub const LIST_PROJECTS_ACTION: &str = "GetAccountAllProjectList";

/// Project information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    pub active: bool,
}

impl From<&Value> for Project {
    fn from(value: &Value) -> Self {
        let project_id = match value.get("ProjectId") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "-".to_string(),
        };
        Self {
            project_id,
            name: value
                .get("ProjectName")
                .and_then(|v| v.as_str())
                .unwrap_or("-")
                .to_string(),
            active: value.get("Status").and_then(|v| v.as_i64()) == Some(1),
        }
    }
}

/// List all projects of the account
pub async fn list_projects(executor: &dyn ActionExecutor) -> Result<Vec<Project>, ActionError> {
    let response = executor.execute(LIST_PROJECTS_ACTION, &WireParams::new()).await?;

    let projects = response
        .get("ListProjectResult")
        .and_then(|v| v.get("ProjectList"))
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().map(Project::from).collect())
        .unwrap_or_default();

    Ok(projects)
}

/// Ids of the active projects
pub async fn list_project_ids(executor: &dyn ActionExecutor) -> Result<Vec<String>, ActionError> {
    let projects = list_projects(executor).await?;
    Ok(projects
        .into_iter()
        .filter(|p| p.active)
        .map(|p| p.project_id)
        .collect())
}
