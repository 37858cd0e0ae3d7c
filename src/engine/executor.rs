//! Action executor seam
//!
//! The engine never talks to the network itself. Everything goes through an
//! [`ActionExecutor`]: the HTTP client in `api` for real runs, scripted
//! in-memory executors in tests.

use super::wire::WireParams;
use crate::error::ActionError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Invokes one named wire action
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &str, params: &WireParams) -> Result<Value, ActionError>;
}

#[async_trait]
impl<T: ActionExecutor + ?Sized> ActionExecutor for Arc<T> {
    async fn execute(&self, action: &str, params: &WireParams) -> Result<Value, ActionError> {
        (**self).execute(action, params).await
    }
}

#[async_trait]
impl<T: ActionExecutor + ?Sized> ActionExecutor for &T {
    async fn execute(&self, action: &str, params: &WireParams) -> Result<Value, ActionError> {
        (**self).execute(action, params).await
    }
}
