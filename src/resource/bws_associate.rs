//! Bandwidth share association
//!
//! Attaches an EIP to a bandwidth share. The identifier is
//! `<band_width_share_id>:<allocation_id>`; every attribute forces
//! replacement, so there is no in-place update.

use super::fetcher::{extract_json_value, fetch_one, Reach};
use super::{builtin_def, Provider, Resource, ResourceDef};
use crate::engine::executor::ActionExecutor;
use crate::engine::orchestrator::{retry_while, CallDescriptor, HookContext, Operation, Recovery};
use crate::engine::request::RequestBuilder;
use crate::engine::response::{MappingRegistry, ReadMode, ResponseMapper};
use crate::engine::schema::Schema;
use crate::engine::scope::ProjectScope;
use crate::engine::transform::TransformRegistry;
use crate::engine::tree::{AttrValue, ResourceData};
use crate::engine::wire::WireParams;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

const ASSOCIATE_ACTION: &str = "AssociateBandWidthShare";
const DISASSOCIATE_ACTION: &str = "DisassociateBandWidthShare";
const ASSOCIATIONS_FIELD: &str = "AssociateBandWidthShareInfoSet";

pub struct BwsAssociate {
    def: &'static ResourceDef,
    schema: Schema,
    rules: TransformRegistry,
    mappings: MappingRegistry,
}

impl BwsAssociate {
    pub fn new() -> Result<Self> {
        let def = builtin_def("bws_associate")?;
        Ok(Self {
            def,
            schema: def.schema()?,
            rules: TransformRegistry::new(),
            mappings: MappingRegistry::new(),
        })
    }
}

/// Split `<share>:<allocation>`
pub fn parse_id(id: &str) -> Result<(String, String)> {
    match id.split_once(':') {
        Some((share, allocation)) if !share.is_empty() && !allocation.is_empty() => {
            Ok((share.to_string(), allocation.to_string()))
        }
        _ => Err(EngineError::mapping(
            "id",
            format!("`{}` is not <band_width_share_id>:<allocation_id>", id),
        )),
    }
}

/// Bandwidth the EIP keeps after leaving the share. The API rejects zero,
/// so an unknown or zero recorded value falls back to 1.
pub fn disassociate_band_width(recorded: Option<i64>) -> i64 {
    match recorded {
        Some(bw) if bw > 0 => bw,
        _ => 1,
    }
}

/// Wire parameters of the disassociate call
pub fn disassociate_params(share: &str, allocation: &str, recorded_band_width: Option<i64>) -> WireParams {
    let mut params = WireParams::new();
    params.insert("BandWidthShareId".to_string(), Value::String(share.to_string()));
    params.insert("AllocationId".to_string(), Value::String(allocation.to_string()));
    params.insert(
        "BandWidth".to_string(),
        Value::from(disassociate_band_width(recorded_band_width)),
    );
    params
}

/// The association as a flat remote object, if the share lists it
async fn find_association(
    executor: &dyn ActionExecutor,
    scope: &ProjectScope,
    def: &ResourceDef,
    share: &str,
    allocation: &str,
    reach: Reach,
) -> Result<Option<Value>> {
    let Some(object) = fetch_one(executor, scope, def, share, None, reach).await? else {
        return Ok(None);
    };
    let associations = extract_json_value(&object, ASSOCIATIONS_FIELD)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    Ok(associations
        .into_iter()
        .find(|a| a.get("AllocationId").and_then(Value::as_str) == Some(allocation))
        .map(|a| {
            json!({
                "BandWidthShareId": share,
                "AllocationId": allocation,
                "BandWidth": a.get("BandWidth").cloned().unwrap_or(Value::Null),
            })
        }))
}

async fn require_association(
    executor: &dyn ActionExecutor,
    scope: &ProjectScope,
    def: &ResourceDef,
    share: &str,
    allocation: &str,
) -> Result<Value> {
    find_association(executor, scope, def, share, allocation, Reach::Configured)
        .await?
        .ok_or_else(|| EngineError::NotFound {
            action: def.read_action.clone(),
            resource_id: format!("{}:{}", share, allocation),
            source: None,
        })
}

async fn still_associated(ctx: HookContext<'_>, scope: ProjectScope, def: &ResourceDef) -> Result<bool> {
    let (share, allocation) = parse_id(ctx.resource_id)?;
    let found = find_association(ctx.executor, &scope, def, &share, &allocation, Reach::AllTenants).await?;
    Ok(found.is_some())
}

fn capture_id(data: &mut ResourceData) -> Result<()> {
    let share = data.get_str("band_width_share_id").unwrap_or_default().to_string();
    let allocation = data.get_str("allocation_id").unwrap_or_default().to_string();
    if share.is_empty() || allocation.is_empty() {
        return Err(EngineError::mapping("id", "association needs a share and an allocation"));
    }
    data.set_id(format!("{}:{}", share, allocation));
    Ok(())
}

#[async_trait]
impl Resource for BwsAssociate {
    fn def(&self) -> &ResourceDef {
        self.def
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, provider: &Provider, data: &mut ResourceData) -> Result<()> {
        let params = RequestBuilder::new(&self.schema, &self.rules).build(data)?;
        let call = CallDescriptor::new(ASSOCIATE_ACTION, params)
            .after(|_ctx, data, _response| Box::pin(async move { capture_id(data) }));
        provider.orchestrator().run(Operation::Create, vec![call], data).await?;

        let (share, allocation) = parse_id(data.id_or_empty())?;
        let executor = provider.executor();
        let scope = provider.scope();
        let def = self.def;
        let (share_ref, allocation_ref) = (share.as_str(), allocation.as_str());
        let object = retry_while(
            "association to become visible",
            provider.timeouts().create,
            provider.poll_interval(),
            || require_association(executor, scope, def, share_ref, allocation_ref),
        )
        .await?;

        ResponseMapper::new(&self.schema, &self.mappings)
            .mode(ReadMode::Full)
            .apply(&object, data)?;
        data.commit();
        Ok(())
    }

    async fn read(&self, provider: &Provider, data: &mut ResourceData) -> Result<()> {
        let Some(id) = data.id().map(str::to_string) else {
            return Ok(());
        };
        let (share, allocation) = parse_id(&id)?;

        let found = find_association(
            provider.executor(),
            provider.scope(),
            self.def,
            &share,
            &allocation,
            Reach::Configured,
        )
        .await?;

        match found {
            Some(object) => {
                ResponseMapper::new(&self.schema, &self.mappings)
                    .mode(ReadMode::Full)
                    .apply(&object, data)?;
                data.commit();
            }
            None => {
                tracing::warn!(id = %id, "association not found, removing from state");
                data.clear_id();
            }
        }
        Ok(())
    }

    async fn update(&self, provider: &Provider, data: &mut ResourceData) -> Result<()> {
        self.read(provider, data).await
    }

    async fn delete(&self, provider: &Provider, data: &mut ResourceData) -> Result<()> {
        let Some(id) = data.id().map(str::to_string) else {
            return Ok(());
        };
        let (share, allocation) = parse_id(&id)?;
        let recorded = data
            .get_prior("band_width")
            .or_else(|| data.get("band_width"))
            .and_then(AttrValue::as_i64);
        let params = disassociate_params(&share, &allocation, recorded);

        let scope = provider.scope().clone();
        let def = self.def;
        let call = CallDescriptor::new(DISASSOCIATE_ACTION, params).recovery(Recovery::retry_until_gone(
            move |ctx| Box::pin(still_associated(ctx, scope.clone(), def)),
        ));

        provider.orchestrator().run(Operation::Delete, vec![call], data).await?;
        data.clear_id();
        Ok(())
    }
}
