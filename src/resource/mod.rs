//! Resource abstraction layer
//!
//! Resource definitions (schema, read action, paging, tag type) are loaded
//! from embedded JSON; the per-resource modules add the call chains that
//! create, update and delete each kind of object.
//!
//! # Architecture
//!
//! - [`registry`] - loads and caches resource definitions from embedded JSON
//! - [`fetcher`] - scoped, paged reads with tag merge
//! - [`bandwidth_share`], [`bws_associate`], [`bandwidth_shares`] - resources

pub mod bandwidth_share;
pub mod bandwidth_shares;
pub mod bws_associate;
pub mod fetcher;
pub mod registry;

pub use registry::*;

use crate::engine::executor::ActionExecutor;
use crate::engine::orchestrator::{Orchestrator, Timeouts};
use crate::engine::schema::Schema;
use crate::engine::scope::ProjectScope;
use crate::engine::tree::ResourceData;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Shared settings every resource operation runs with
#[derive(Clone)]
pub struct Provider {
    executor: Arc<dyn ActionExecutor>,
    scope: ProjectScope,
    dry_run: bool,
    timeouts: Timeouts,
    poll_interval: Duration,
}

impl Provider {
    pub fn new(executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            executor,
            scope: ProjectScope::default(),
            dry_run: true,
            timeouts: Timeouts::default(),
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn with_scope(mut self, scope: ProjectScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn executor(&self) -> &dyn ActionExecutor {
        self.executor.as_ref()
    }

    pub fn scope(&self) -> &ProjectScope {
        &self.scope
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator::new(self.executor.as_ref())
            .dry_run(self.dry_run)
            .timeouts(self.timeouts)
            .poll_interval(self.poll_interval)
    }
}

/// CRUD over one kind of remote object.
///
/// Data sources only implement [`Resource::read`]; the other operations
/// default to a read (create/update) or to forgetting the id (delete).
#[async_trait]
pub trait Resource: Send + Sync {
    fn def(&self) -> &ResourceDef;

    fn schema(&self) -> &Schema;

    async fn read(&self, provider: &Provider, data: &mut ResourceData) -> Result<()>;

    async fn create(&self, provider: &Provider, data: &mut ResourceData) -> Result<()> {
        self.read(provider, data).await
    }

    async fn update(&self, provider: &Provider, data: &mut ResourceData) -> Result<()> {
        self.read(provider, data).await
    }

    async fn delete(&self, _provider: &Provider, data: &mut ResourceData) -> Result<()> {
        data.clear_id();
        Ok(())
    }
}

/// Look up a resource implementation by registry key
pub fn lookup(key: &str) -> Result<Box<dyn Resource>> {
    match key {
        "bandwidth_share" => Ok(Box::new(bandwidth_share::BandwidthShare::new()?)),
        "bws_associate" => Ok(Box::new(bws_associate::BwsAssociate::new()?)),
        "bandwidth_shares" => Ok(Box::new(bandwidth_shares::BandwidthShares::new()?)),
        other => Err(EngineError::mapping(other, "unknown resource")),
    }
}

/// Registry definition that must exist for a built-in resource
pub(crate) fn builtin_def(key: &str) -> Result<&'static ResourceDef> {
    get_resource(key).ok_or_else(|| EngineError::mapping(key, "resource definition missing from registry"))
}

/// Create, replace or update `data` depending on its recorded state
pub async fn apply(resource: &dyn Resource, provider: &Provider, data: &mut ResourceData) -> Result<()> {
    if data.is_new() {
        return resource.create(provider, data).await;
    }

    let reasons = data.replacement_reasons(resource.schema());
    if !reasons.is_empty() {
        tracing::info!(resource = %data.id_or_empty(), ?reasons, "change forces replacement");
        let desired = data.values().clone();
        resource.delete(provider, data).await?;
        *data = ResourceData::new(desired);
        return resource.create(provider, data).await;
    }

    resource.update(provider, data).await
}
