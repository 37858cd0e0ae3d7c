//! Bandwidth share
//!
//! A pool of bandwidth that several EIPs draw from. Tags are managed through
//! the tag service in separate calls.

use super::fetcher::{fetch_one, Reach};
use super::{builtin_def, Provider, Resource, ResourceDef};
use crate::engine::diff::SetDiff;
use crate::engine::executor::ActionExecutor;
use crate::engine::orchestrator::{retry_while, CallDescriptor, HookContext, Operation, Recovery, StateWaiter};
use crate::engine::request::RequestBuilder;
use crate::engine::response::{MappingRegistry, ReadMode, ResponseMapper};
use crate::engine::schema::Schema;
use crate::engine::scope::ProjectScope;
use crate::engine::tags::replace_tags_call;
use crate::engine::transform::{FieldRule, TransformRegistry};
use crate::engine::tree::{AttrValue, ResourceData};
use crate::engine::wire::WireParams;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

const CREATE_ACTION: &str = "CreateBandWidthShare";
const MODIFY_ACTION: &str = "ModifyBandWidthShare";
const DELETE_ACTION: &str = "DeleteBandWidthShare";
const ID_PARAM: &str = "BandWidthShareId";

pub struct BandwidthShare {
    def: &'static ResourceDef,
    schema: Schema,
    create_rules: TransformRegistry,
    update_rules: TransformRegistry,
    mappings: MappingRegistry,
}

impl BandwidthShare {
    pub fn new() -> Result<Self> {
        let def = builtin_def("bandwidth_share")?;
        let schema = def.schema()?;
        let create_rules = TransformRegistry::new().rule("tags", FieldRule::ignored());
        let update_rules = TransformRegistry::new().only(&schema, &["band_width", "band_width_share_name"]);

        Ok(Self {
            def,
            schema,
            create_rules,
            update_rules,
            mappings: MappingRegistry::new(),
        })
    }

    fn tag_type(&self) -> &str {
        self.def.tag_resource_type.as_deref().unwrap_or("bws")
    }

    /// Refresh from the remote object; false when it no longer exists
    async fn refresh(&self, provider: &Provider, data: &mut ResourceData, mode: ReadMode) -> Result<bool> {
        let Some(id) = data.id().map(str::to_string) else {
            return Ok(false);
        };
        let project = data.get_str("project_id").map(str::to_string);

        let found = fetch_one(
            provider.executor(),
            provider.scope(),
            self.def,
            &id,
            project.as_deref(),
            Reach::Configured,
        )
        .await?;

        match found {
            Some(object) => {
                ResponseMapper::new(&self.schema, &self.mappings)
                    .mode(mode)
                    .apply(&object, data)?;
                data.commit();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl Resource for BandwidthShare {
    fn def(&self) -> &ResourceDef {
        self.def
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, provider: &Provider, data: &mut ResourceData) -> Result<()> {
        let params = RequestBuilder::new(&self.schema, &self.create_rules).build(data)?;
        let create = CallDescriptor::new(CREATE_ACTION, params)
            .after(|_ctx, data, response| Box::pin(async move { capture_id(data, response) }));

        let orchestrator = provider.orchestrator();
        orchestrator.run(Operation::Create, vec![create], data).await?;

        let id = data.id_or_empty().to_string();
        if let Some(tags) = data.get_ok("tags").and_then(AttrValue::as_block).cloned() {
            let calls = vec![replace_tags_call(self.tag_type(), &id, Some(&tags))];
            orchestrator.run(Operation::Create, calls, data).await?;
        }

        // A new share may not be visible to reads right away.
        let executor = provider.executor();
        let scope = provider.scope();
        let def = self.def;
        let id_ref = id.as_str();
        let project = data.get_str("project_id").map(str::to_string);
        let project_ref = project.as_deref();
        let object = retry_while(
            "new bandwidth share to become readable",
            provider.timeouts().create,
            provider.poll_interval(),
            || fetch_existing(executor, scope, def, id_ref, project_ref),
        )
        .await?;

        ResponseMapper::new(&self.schema, &self.mappings)
            .mode(ReadMode::Full)
            .apply(&object, data)?;
        data.commit();
        tracing::info!(id = %id, "bandwidth share created");
        Ok(())
    }

    async fn read(&self, provider: &Provider, data: &mut ResourceData) -> Result<()> {
        if !self.refresh(provider, data, ReadMode::Full).await? {
            tracing::warn!(id = %data.id_or_empty(), "bandwidth share not found, removing from state");
            data.clear_id();
        }
        Ok(())
    }

    async fn update(&self, provider: &Provider, data: &mut ResourceData) -> Result<()> {
        let id = data
            .id()
            .map(str::to_string)
            .ok_or_else(|| EngineError::mapping("id", "update needs an existing bandwidth share"))?;

        let mut calls = Vec::new();
        let mut params = RequestBuilder::new(&self.schema, &self.update_rules)
            .update_only(true)
            .build(data)?;
        if !params.is_empty() {
            params.insert(ID_PARAM.to_string(), Value::String(id.clone()));
            calls.push(CallDescriptor::new(MODIFY_ACTION, params));
        }
        let tag_diff = tag_changes(data);
        if !tag_diff.is_empty() {
            tracing::debug!(
                added = tag_diff.added.len(),
                removed = tag_diff.removed.len(),
                modified = tag_diff.modified.len(),
                "tags changed"
            );
            let tags = data.get("tags").and_then(AttrValue::as_block);
            calls.push(replace_tags_call(self.tag_type(), &id, tags));
        }

        provider.orchestrator().run(Operation::Update, calls, data).await?;

        if !self.refresh(provider, data, ReadMode::Partial).await? {
            return Err(EngineError::NotFound {
                action: self.def.read_action.clone(),
                resource_id: id,
                source: None,
            });
        }
        Ok(())
    }

    async fn delete(&self, provider: &Provider, data: &mut ResourceData) -> Result<()> {
        let Some(id) = data.id().map(str::to_string) else {
            return Ok(());
        };
        let mut params = WireParams::new();
        params.insert(ID_PARAM.to_string(), Value::String(id));

        let scope = provider.scope().clone();
        let wait_scope = scope.clone();
        let def = self.def;
        let call = CallDescriptor::new(DELETE_ACTION, params)
            .recovery(Recovery::retry_until_gone(move |ctx| {
                Box::pin(exists_anywhere(ctx, scope.clone(), def))
            }))
            .after(move |ctx, _data, _response| Box::pin(wait_until_gone(ctx, wait_scope.clone(), def)));

        provider.orchestrator().run(Operation::Delete, vec![call], data).await?;
        data.clear_id();
        Ok(())
    }
}

fn capture_id(data: &mut ResourceData, response: Option<&Value>) -> Result<()> {
    let id = response
        .and_then(|r| r.get(ID_PARAM))
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::mapping(ID_PARAM, "create response carries no identifier"))?;
    data.set_id(id);
    Ok(())
}

/// Tag pairs added, removed or re-valued since the last recorded state
fn tag_changes(data: &ResourceData) -> SetDiff<(String, AttrValue)> {
    let pairs = |v: Option<&AttrValue>| -> Vec<(String, AttrValue)> {
        v.and_then(AttrValue::as_block)
            .map(|b| b.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    };
    let (recorded, desired) = data.get_change("tags");
    SetDiff::compute(&pairs(recorded), &pairs(desired), |(k, _)| k.clone())
}

/// Existing object or a retryable not-found
async fn fetch_existing(
    executor: &dyn ActionExecutor,
    scope: &ProjectScope,
    def: &ResourceDef,
    id: &str,
    project: Option<&str>,
) -> Result<Value> {
    fetch_one(executor, scope, def, id, project, Reach::Configured)
        .await?
        .ok_or_else(|| EngineError::NotFound {
            action: def.read_action.clone(),
            resource_id: id.to_string(),
            source: None,
        })
}

/// Existence check for the delete retry, across every project
async fn exists_anywhere(ctx: HookContext<'_>, scope: ProjectScope, def: &ResourceDef) -> Result<bool> {
    let found = fetch_one(ctx.executor, &scope, def, ctx.resource_id, None, Reach::AllTenants).await?;
    Ok(found.is_some())
}

/// Listings keep showing a deleted share for a while
async fn wait_until_gone(ctx: HookContext<'_>, scope: ProjectScope, def: &'static ResourceDef) -> Result<()> {
    let executor = ctx.executor;
    let id = ctx.resource_id.to_string();
    StateWaiter::new(ctx.resource_id, move || {
        let scope = scope.clone();
        let id = id.clone();
        async move {
            let found = fetch_one(executor, &scope, def, &id, None, Reach::AllTenants).await?;
            Ok(found.map(|object| ("present".to_string(), object)))
        }
        .boxed()
    })
    .pending(&["present"])
    .min_interval(ctx.poll_interval)
    .timeout(ctx.timeout)
    .wait()
    .await?;
    Ok(())
}
