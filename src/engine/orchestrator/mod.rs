//! Call orchestrator
//!
//! Runs the ordered chain of calls behind one logical operation: an optional
//! dry-run pass over the whole chain, then the real pass with preconditions,
//! error recovery and post-execution hooks.

mod retry;
mod waiter;

pub use retry::{retry_while, DELETE_RETRY_CEILING};
pub use waiter::StateWaiter;

use super::executor::ActionExecutor;
use super::tree::ResourceData;
use super::wire::{WireParams, DRY_RUN_PARAM};
use crate::error::{ActionError, EngineError, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// The logical operation a chain belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Per-operation ceilings for convergence waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(10 * 60),
            update: Duration::from_secs(10 * 60),
            delete: Duration::from_secs(10 * 60),
        }
    }
}

impl Timeouts {
    pub fn for_operation(&self, op: Operation) -> Duration {
        match op {
            Operation::Create => self.create,
            Operation::Update => self.update,
            Operation::Read | Operation::Delete => self.delete,
        }
    }
}

/// Immutable context of one orchestrated operation
#[derive(Debug, Clone, PartialEq)]
pub struct CallContext {
    call_id: Uuid,
    operation: Operation,
    started_at: DateTime<Utc>,
    dry_run: bool,
}

impl CallContext {
    pub fn new(operation: Operation) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            operation,
            started_at: Utc::now(),
            dry_run: false,
        }
    }

    pub fn with_dry_run(&self) -> Self {
        Self {
            dry_run: true,
            ..self.clone()
        }
    }

    pub fn without_dry_run(&self) -> Self {
        Self {
            dry_run: false,
            ..self.clone()
        }
    }

    pub fn call_id(&self) -> Uuid {
        self.call_id
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// What every hook gets to see
#[derive(Clone, Copy)]
pub struct HookContext<'a> {
    pub executor: &'a dyn ActionExecutor,
    pub call: &'a CallContext,
    pub action: &'a str,
    pub params: &'a WireParams,
    /// Identifier as it was when the call started (empty before creation)
    pub resource_id: &'a str,
    /// Ceiling for waits started from this call
    pub timeout: Duration,
    pub poll_interval: Duration,
}

pub type PreconditionFn<'h> =
    Box<dyn for<'a> Fn(HookContext<'a>, &'a ResourceData) -> BoxFuture<'a, Result<bool>> + Send + Sync + 'h>;
pub type ExecuteFn<'h> =
    Box<dyn for<'a> Fn(HookContext<'a>) -> BoxFuture<'a, Result<Value, ActionError>> + Send + Sync + 'h>;
pub type RecoveryFn<'h> = Box<
    dyn for<'a> Fn(HookContext<'a>, ActionError) -> BoxFuture<'a, Result<Option<Value>>> + Send + Sync + 'h,
>;
pub type ExistsFn<'h> = Box<dyn for<'a> Fn(HookContext<'a>) -> BoxFuture<'a, Result<bool>> + Send + Sync + 'h>;
pub type AfterFn<'h> = Box<
    dyn for<'a> Fn(HookContext<'a>, &'a mut ResourceData, Option<&'a Value>) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync
        + 'h,
>;

/// What happens when the real call fails
pub enum Recovery<'h> {
    None,
    /// Reclassify the error: `Ok(Some(resp))`/`Ok(None)` recovers, `Err` aborts
    Custom(RecoveryFn<'h>),
    /// Delete path: poll existence and re-issue the call until it is gone
    RetryUntilGone { exists: ExistsFn<'h>, timeout: Duration },
}

impl<'h> Recovery<'h> {
    pub fn custom<F>(f: F) -> Self
    where
        F: for<'a> Fn(HookContext<'a>, ActionError) -> BoxFuture<'a, Result<Option<Value>>> + Send + Sync + 'h,
    {
        Self::Custom(Box::new(f))
    }

    pub fn retry_until_gone<F>(exists: F) -> Self
    where
        F: for<'a> Fn(HookContext<'a>) -> BoxFuture<'a, Result<bool>> + Send + Sync + 'h,
    {
        Self::RetryUntilGone {
            exists: Box::new(exists),
            timeout: DELETE_RETRY_CEILING,
        }
    }

    pub fn within(self, ceiling: Duration) -> Self {
        match self {
            Self::RetryUntilGone { exists, .. } => Self::RetryUntilGone {
                exists,
                timeout: ceiling,
            },
            other => other,
        }
    }
}

/// One remote call in a chain. Built per operation, consumed once.
pub struct CallDescriptor<'h> {
    action: String,
    params: WireParams,
    disable_dry_run: bool,
    precondition: Option<PreconditionFn<'h>>,
    execute: Option<ExecuteFn<'h>>,
    recovery: Recovery<'h>,
    after: Option<AfterFn<'h>>,
}

impl fmt::Debug for CallDescriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallDescriptor")
            .field("action", &self.action)
            .field("params", &self.params)
            .field("disable_dry_run", &self.disable_dry_run)
            .field("precondition", &self.precondition.is_some())
            .field("execute", &self.execute.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

impl<'h> CallDescriptor<'h> {
    pub fn new(action: &str, params: WireParams) -> Self {
        Self {
            action: action.to_string(),
            params,
            disable_dry_run: false,
            precondition: None,
            execute: None,
            recovery: Recovery::None,
            after: None,
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn params(&self) -> &WireParams {
        &self.params
    }

    /// Leave this call out of the dry-run pass
    pub fn no_dry_run(mut self) -> Self {
        self.disable_dry_run = true;
        self
    }

    pub fn precondition<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(HookContext<'a>, &'a ResourceData) -> BoxFuture<'a, Result<bool>> + Send + Sync + 'h,
    {
        self.precondition = Some(Box::new(f));
        self
    }

    pub fn execute_with<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(HookContext<'a>) -> BoxFuture<'a, Result<Value, ActionError>> + Send + Sync + 'h,
    {
        self.execute = Some(Box::new(f));
        self
    }

    pub fn recovery(mut self, recovery: Recovery<'h>) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn after<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(HookContext<'a>, &'a mut ResourceData, Option<&'a Value>) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'h,
    {
        self.after = Some(Box::new(f));
        self
    }

    async fn invoke(&self, hook: HookContext<'_>) -> Result<Value, ActionError> {
        match &self.execute {
            Some(f) => f(hook).await,
            None => hook.executor.execute(hook.action, hook.params).await,
        }
    }
}

/// Sequences call chains against one executor
pub struct Orchestrator<'e> {
    executor: &'e dyn ActionExecutor,
    dry_run: bool,
    timeouts: Timeouts,
    poll_interval: Duration,
}

impl<'e> Orchestrator<'e> {
    pub fn new(executor: &'e dyn ActionExecutor) -> Self {
        Self {
            executor,
            dry_run: true,
            timeouts: Timeouts::default(),
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn executor(&self) -> &'e dyn ActionExecutor {
        self.executor
    }

    /// Run `calls` in order for one operation on `data`
    pub async fn run(&self, op: Operation, calls: Vec<CallDescriptor<'_>>, data: &mut ResourceData) -> Result<()> {
        if calls.is_empty() {
            return Ok(());
        }
        let mut ctx = CallContext::new(op);

        if self.dry_run {
            let dry = ctx.with_dry_run();
            self.dry_run_pass(&dry, &calls, data).await?;
            ctx = dry.without_dry_run();
        }

        for descriptor in &calls {
            self.run_one(&ctx, descriptor, data).await?;
        }
        tracing::info!(call_id = %ctx.call_id(), operation = %op, calls = calls.len(), "operation completed");
        Ok(())
    }

    async fn dry_run_pass(&self, ctx: &CallContext, calls: &[CallDescriptor<'_>], data: &ResourceData) -> Result<()> {
        let resource_id = data.id_or_empty();
        for descriptor in calls.iter().filter(|c| !c.disable_dry_run) {
            let mut params = descriptor.params.clone();
            params.insert(DRY_RUN_PARAM.to_string(), Value::Bool(true));
            let hook = self.hook_context(ctx, descriptor, &params, resource_id);

            match descriptor.invoke(hook).await {
                Ok(_) => tracing::debug!(action = %descriptor.action, "dry run accepted"),
                Err(e) if e.is_dry_run_passed() => {
                    tracing::debug!(action = %descriptor.action, "dry run passed")
                }
                Err(e) => self.dry_run_rejected(descriptor, hook, e).await?,
            }
        }
        Ok(())
    }

    /// A dry-run error goes through the call's recovery before it can abort
    /// the chain. Delete-type calls let the real pass retry.
    async fn dry_run_rejected(
        &self,
        descriptor: &CallDescriptor<'_>,
        hook: HookContext<'_>,
        error: ActionError,
    ) -> Result<()> {
        match &descriptor.recovery {
            Recovery::None => {
                tracing::warn!(action = %descriptor.action, error = %error, "dry run rejected, aborting chain");
                Err(EngineError::from_action(&descriptor.action, hook.resource_id, error))
            }
            Recovery::RetryUntilGone { .. } if error.is_not_found() => {
                tracing::debug!(action = %descriptor.action, "dry run found nothing to remove");
                Ok(())
            }
            Recovery::RetryUntilGone { .. } => {
                tracing::warn!(action = %descriptor.action, error = %error, "dry run rejected, leaving it to the delete retry");
                Ok(())
            }
            Recovery::Custom(f) => {
                f(hook, error).await?;
                tracing::debug!(action = %descriptor.action, "dry run error recovered");
                Ok(())
            }
        }
    }

    async fn run_one(&self, ctx: &CallContext, descriptor: &CallDescriptor<'_>, data: &mut ResourceData) -> Result<()> {
        let resource_id = data.id_or_empty().to_string();
        let hook = self.hook_context(ctx, descriptor, &descriptor.params, &resource_id);

        if let Some(pre) = &descriptor.precondition {
            if !pre(hook, &*data).await? {
                tracing::info!(action = %descriptor.action, resource = %resource_id, "precondition not met, skipping call");
                if let Some(after) = &descriptor.after {
                    after(hook, &mut *data, None).await?;
                }
                return Ok(());
            }
        }

        tracing::debug!(action = %descriptor.action, params = ?descriptor.params, "executing");
        let response = match descriptor.invoke(hook).await {
            Ok(v) => Some(v),
            Err(e) => self.recover(descriptor, hook, e).await?,
        };

        if let Some(after) = &descriptor.after {
            after(hook, &mut *data, response.as_ref()).await?;
        }
        tracing::info!(action = %descriptor.action, resource = %resource_id, "call succeeded");
        Ok(())
    }

    async fn recover(
        &self,
        descriptor: &CallDescriptor<'_>,
        hook: HookContext<'_>,
        error: ActionError,
    ) -> Result<Option<Value>> {
        match &descriptor.recovery {
            Recovery::None => Err(EngineError::from_action(&descriptor.action, hook.resource_id, error)),
            Recovery::Custom(f) => {
                tracing::warn!(action = %descriptor.action, error = %error, "call failed, running recovery hook");
                f(hook, error).await
            }
            Recovery::RetryUntilGone { exists, timeout } => {
                retry::retry_until_gone(descriptor, hook, exists, *timeout, error).await?;
                Ok(None)
            }
        }
    }

    fn hook_context<'a>(
        &'a self,
        ctx: &'a CallContext,
        descriptor: &'a CallDescriptor<'_>,
        params: &'a WireParams,
        resource_id: &'a str,
    ) -> HookContext<'a> {
        HookContext {
            executor: self.executor,
            call: ctx,
            action: &descriptor.action,
            params,
            resource_id,
            timeout: self.timeouts.for_operation(ctx.operation()),
            poll_interval: self.poll_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_context_dry_run_is_a_new_value() {
        let ctx = CallContext::new(Operation::Create);
        let dry = ctx.with_dry_run();
        assert!(!ctx.is_dry_run());
        assert!(dry.is_dry_run());
        assert_eq!(dry.call_id(), ctx.call_id());
        assert!(!dry.without_dry_run().is_dry_run());
    }

    #[test]
    fn test_timeouts_per_operation() {
        let timeouts = Timeouts {
            create: Duration::from_secs(1),
            update: Duration::from_secs(2),
            delete: Duration::from_secs(3),
        };
        assert_eq!(timeouts.for_operation(Operation::Create), Duration::from_secs(1));
        assert_eq!(timeouts.for_operation(Operation::Update), Duration::from_secs(2));
        assert_eq!(timeouts.for_operation(Operation::Delete), Duration::from_secs(3));
    }

    #[test]
    fn test_recovery_within_overrides_ceiling() {
        let recovery = Recovery::retry_until_gone(|_| Box::pin(async { Ok(false) })).within(Duration::from_secs(1));
        match recovery {
            Recovery::RetryUntilGone { timeout, .. } => assert_eq!(timeout, Duration::from_secs(1)),
            _ => panic!("expected retry recovery"),
        }
    }
}
