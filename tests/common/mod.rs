//! Shared in-memory executor for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use cloudrecon::engine::{ActionExecutor, WireParams};
use cloudrecon::error::ActionError;
use serde_json::{json, Value};
use std::sync::Mutex;

type Handler = Box<dyn Fn(&str, &WireParams) -> Result<Value, ActionError> + Send + Sync>;

/// Answers every action through a handler and records what was sent
pub struct ScriptedExecutor {
    handler: Handler,
    calls: Mutex<Vec<(String, WireParams)>>,
}

impl ScriptedExecutor {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &WireParams) -> Result<Value, ActionError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Accept everything; dry runs answer 412
    pub fn accepting() -> Self {
        Self::new(|_, params| {
            if is_dry_run(params) {
                Err(ActionError::dry_run_passed())
            } else {
                Ok(json!({}))
            }
        })
    }

    pub fn calls(&self) -> Vec<(String, WireParams)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.calls().into_iter().map(|(action, _)| action).collect()
    }

    /// Calls of `action` sent without the dry-run flag
    pub fn real_calls(&self, action: &str) -> Vec<WireParams> {
        self.calls()
            .into_iter()
            .filter(|(a, p)| a == action && !is_dry_run(p))
            .map(|(_, p)| p)
            .collect()
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    async fn execute(&self, action: &str, params: &WireParams) -> Result<Value, ActionError> {
        self.calls.lock().unwrap().push((action.to_string(), params.clone()));
        (self.handler)(action, params)
    }
}

pub fn is_dry_run(params: &WireParams) -> bool {
    params.get("DryRun") == Some(&Value::Bool(true))
}

/// One-page listing response of the bandwidth share read action
pub fn share_listing(shares: Vec<Value>) -> Value {
    json!({ "BandWidthShareSet": shares, "RequestId": "req-test" })
}

/// Answer for the account project listing
pub fn project_listing() -> Value {
    json!({
        "ListProjectResult": {
            "ProjectList": [{"ProjectId": 0, "Status": 1}]
        }
    })
}
