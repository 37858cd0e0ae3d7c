//! Convergence waits
//!
//! Poll a refresh function until the remote object reaches a target state.

use crate::engine::collection::items_at;
use crate::engine::executor::ActionExecutor;
use crate::engine::wire::WireParams;
use crate::error::{EngineError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Current `(state, object)`, or `None` when the object is not (yet) visible
pub type RefreshFn<'a> = Box<dyn FnMut() -> BoxFuture<'a, Result<Option<(String, Value)>>> + Send + 'a>;

pub struct StateWaiter<'a> {
    resource_id: String,
    pending: Vec<String>,
    target: Vec<String>,
    failure: Vec<String>,
    refresh: RefreshFn<'a>,
    delay: Duration,
    min_interval: Duration,
    timeout: Duration,
}

impl<'a> StateWaiter<'a> {
    pub fn new<F>(resource_id: &str, refresh: F) -> Self
    where
        F: FnMut() -> BoxFuture<'a, Result<Option<(String, Value)>>> + Send + 'a,
    {
        Self {
            resource_id: resource_id.to_string(),
            pending: vec![],
            target: vec![],
            failure: vec![],
            refresh: Box::new(refresh),
            delay: Duration::ZERO,
            min_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(10 * 60),
        }
    }

    /// Waiter that runs `action` and reads `state_field` from the first item
    /// at `items_path` (or from the response itself when the path is empty)
    pub fn from_query(
        executor: &'a dyn ActionExecutor,
        resource_id: &str,
        action: &str,
        params: WireParams,
        items_path: &str,
        state_field: &str,
    ) -> Self {
        let action = action.to_string();
        let items_path = items_path.to_string();
        let state_field = state_field.to_string();
        let id = resource_id.to_string();

        Self::new(resource_id, move || {
            let action = action.clone();
            let params = params.clone();
            let items_path = items_path.clone();
            let state_field = state_field.clone();
            let id = id.clone();
            async move {
                let response = match executor.execute(&action, &params).await {
                    Ok(v) => v,
                    Err(e) if e.is_not_found() => return Ok(None),
                    Err(e) => return Err(EngineError::from_action(&action, &id, e)),
                };
                let object = if items_path.is_empty() {
                    Some(response)
                } else {
                    items_at(&response, &items_path).into_iter().next()
                };
                Ok(object.map(|obj| {
                    let state = state_of(&obj, &state_field);
                    (state, obj)
                }))
            }
            .boxed()
        })
    }

    pub fn pending(mut self, states: &[&str]) -> Self {
        self.pending = states.iter().map(|s| s.to_string()).collect();
        self
    }

    /// An empty target means "wait until the object is gone"
    pub fn target(mut self, states: &[&str]) -> Self {
        self.target = states.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn failure(mut self, states: &[&str]) -> Self {
        self.failure = states.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Poll until a target state. Returns the last refreshed object
    /// (`Value::Null` when waiting for disappearance).
    pub async fn wait(mut self) -> Result<Value> {
        let deadline = Instant::now() + self.timeout;
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        let mut last_state = String::from("unknown");

        loop {
            match (self.refresh)().await {
                Ok(Some((state, object))) => {
                    if self.target.contains(&state) {
                        tracing::info!(resource = %self.resource_id, state = %state, "target state reached");
                        return Ok(object);
                    }
                    if self.failure.contains(&state) {
                        return Err(EngineError::Convergence {
                            resource_id: self.resource_id.clone(),
                            state,
                        });
                    }
                    if !self.pending.is_empty() && !self.pending.contains(&state) {
                        return Err(EngineError::Convergence {
                            resource_id: self.resource_id.clone(),
                            state: format!("unexpected state {}", state),
                        });
                    }
                    tracing::debug!(resource = %self.resource_id, state = %state, "still pending");
                    last_state = state;
                }
                Ok(None) => {
                    if self.target.is_empty() {
                        tracing::info!(resource = %self.resource_id, "object is gone");
                        return Ok(Value::Null);
                    }
                    last_state = String::from("not found");
                }
                Err(e) if e.is_not_found() => {
                    if self.target.is_empty() {
                        return Ok(Value::Null);
                    }
                    last_state = String::from("not found");
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(EngineError::Timeout {
                    what: format!("{} to reach {:?}", self.resource_id, self.target),
                    timeout: self.timeout,
                    last_state,
                });
            }
            sleep(self.min_interval.min(deadline - now)).await;
        }
    }
}

fn state_of(object: &Value, field: &str) -> String {
    let mut current = object;
    for part in field.split('.') {
        current = match current.get(part) {
            Some(v) => v,
            None => return String::new(),
        };
    }
    match current {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
