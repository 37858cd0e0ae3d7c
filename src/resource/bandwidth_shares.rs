//! Bandwidth shares data source
//!
//! Lists bandwidth shares by id, project and name pattern.

use super::fetcher::{fetch_objects, Reach};
use super::{builtin_def, Provider, Resource, ResourceDef};
use crate::engine::collection::{reconcile_listing, IdsMatch, ListingSpec, MatchPlugin};
use crate::engine::request::RequestBuilder;
use crate::engine::response::MappingRegistry;
use crate::engine::schema::Schema;
use crate::engine::transform::{FieldRule, TransformRegistry};
use crate::engine::tree::ResourceData;
use crate::error::{EngineError, Result};
use async_trait::async_trait;

const LISTING_ATTR: &str = "band_width_shares";

pub struct BandwidthShares {
    def: &'static ResourceDef,
    schema: Schema,
    element_schema: Schema,
    rules: TransformRegistry,
    mappings: MappingRegistry,
}

impl BandwidthShares {
    pub fn new() -> Result<Self> {
        let def = builtin_def("bandwidth_shares")?;
        let schema = def.schema()?;
        let element_schema = schema
            .get(LISTING_ATTR)
            .and_then(|attr| attr.kind.nested())
            .cloned()
            .ok_or_else(|| EngineError::mapping(LISTING_ATTR, "listing attribute must be a block"))?;

        let rules = TransformRegistry::new()
            .rule("ids", FieldRule::rename(&def.id_param))
            .rule("project_ids", FieldRule::rename("ProjectId"))
            .rule("name_regex", FieldRule::ignored())
            .rule("output_file", FieldRule::ignored());

        Ok(Self {
            def,
            schema,
            element_schema,
            rules,
            mappings: MappingRegistry::new(),
        })
    }
}

#[async_trait]
impl Resource for BandwidthShares {
    fn def(&self) -> &ResourceDef {
        self.def
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn read(&self, provider: &Provider, data: &mut ResourceData) -> Result<()> {
        let params = RequestBuilder::new(&self.schema, &self.rules).build(data)?;
        let objects = fetch_objects(provider.executor(), provider.scope(), self.def, params, Reach::Configured).await?;

        let layout = ListingSpec {
            element_schema: &self.element_schema,
            mappings: &self.mappings,
            id_attr: "band_width_share_id",
            name_attr: Some("band_width_share_name"),
            listing_attr: LISTING_ATTR,
        };
        let ids = IdsMatch::new("ids", &self.def.id_field);
        let plugins: [&dyn MatchPlugin; 1] = [&ids];

        reconcile_listing(data, objects, &layout, &plugins)?;
        data.commit();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tree::{AttrValue, Block};
    use serde_json::json;

    #[test]
    fn test_query_params() {
        let shares = BandwidthShares::new().unwrap();
        let mut values = Block::new();
        values.insert("ids".into(), AttrValue::from(vec!["bws-1", "bws-2"]));
        values.insert("project_ids".into(), AttrValue::from(vec!["104"]));
        values.insert("name_regex".into(), AttrValue::from("^prod"));
        values.insert("output_file".into(), AttrValue::from("/tmp/out.json"));
        let data = ResourceData::new(values);

        let params = RequestBuilder::new(&shares.schema, &shares.rules).build(&data).unwrap();
        assert_eq!(params["BandWidthShareId.1"], json!("bws-1"));
        assert_eq!(params["BandWidthShareId.2"], json!("bws-2"));
        assert_eq!(params["ProjectId.1"], json!("104"));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_element_schema_is_listing_block() {
        let shares = BandwidthShares::new().unwrap();
        assert!(shares.element_schema.get("band_width_share_id").is_some());
        assert!(shares.element_schema.get("associate_band_width_share_info_set").is_some());
    }
}
