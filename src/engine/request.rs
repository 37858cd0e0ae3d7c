//! Request builder
//!
//! Walks the attribute tree against its schema and the transform registry
//! and produces the flat wire map for one call.

use super::schema::{to_kebab_case, to_pascal_case, AttrKind, Attribute, Schema};
use super::transform::{FieldEmit, FieldRule, ListMode, TransformRegistry};
use super::tree::{values_equal, AttrValue, Block, ResourceData};
use super::wire::{indexed_key, indexed_sub_key, next_filter_index, push_filter, WireParams};
use crate::error::{EngineError, Result};
use serde_json::Value;

/// Builds wire maps for one resource
pub struct RequestBuilder<'a> {
    schema: &'a Schema,
    rules: &'a TransformRegistry,
    update_only: bool,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(schema: &'a Schema, rules: &'a TransformRegistry) -> Self {
        Self {
            schema,
            rules,
            update_only: false,
        }
    }

    /// Only emit fields whose value changed (or that are forced)
    pub fn update_only(mut self, update_only: bool) -> Self {
        self.update_only = update_only;
        self
    }

    pub fn build(&self, data: &ResourceData) -> Result<WireParams> {
        let mut params = WireParams::new();
        self.build_into(data, &mut params)?;
        Ok(params)
    }

    /// Append to an existing map (e.g. one that already holds the id key)
    pub fn build_into(&self, data: &ResourceData, params: &mut WireParams) -> Result<()> {
        self.rules.validate(self.schema)?;

        let default_rule = FieldRule::default();
        let mut filter_index = next_filter_index(params);

        for attr in self.schema.attributes() {
            if attr.is_computed_only() {
                continue;
            }
            let rule = self.rules.get(&attr.name).unwrap_or(&default_rule);
            if rule.ignore {
                continue;
            }
            if self.update_only
                && !rule.force_update
                && values_equal(&attr.kind, data.get_prior(&attr.name), data.get(&attr.name))
            {
                continue;
            }
            let Some(raw) = data.get_ok(&attr.name) else {
                continue;
            };

            let value = match &rule.value_fn {
                Some(f) => match f(data, raw)? {
                    Some(v) => v,
                    None => continue,
                },
                None => raw.clone(),
            };

            let wire_name = rule
                .rename
                .clone()
                .unwrap_or_else(|| to_pascal_case(&attr.name));

            if let Some(field_fn) = &rule.field_fn {
                filter_index = field_fn(FieldEmit {
                    data,
                    name: &attr.name,
                    wire_name: &wire_name,
                    value: &value,
                    params: &mut *params,
                    index: filter_index,
                })?;
                continue;
            }

            tracing::trace!(attribute = %attr.name, wire = %wire_name, "emit field");
            filter_index = self.emit(attr, rule, &wire_name, &value, params, filter_index)?;
        }
        Ok(())
    }

    fn emit(
        &self,
        attr: &Attribute,
        rule: &FieldRule,
        wire_name: &str,
        value: &AttrValue,
        params: &mut WireParams,
        filter_index: usize,
    ) -> Result<usize> {
        let mode = rule.list_mode.unwrap_or(match &attr.kind {
            AttrKind::Block { max_items: Some(1), .. } => ListMode::Composite,
            _ => ListMode::Indexed,
        });

        match (&attr.kind, mode) {
            (AttrKind::Scalar(_), ListMode::Filter) => {
                let filter_name = filter_name(attr, rule);
                push_filter(params, filter_index, &filter_name, &[scalar(&attr.name, value)?]);
                Ok(filter_index + 1)
            }
            (AttrKind::Scalar(_), _) => {
                params.insert(wire_name.to_string(), scalar(&attr.name, value)?);
                Ok(filter_index)
            }
            (AttrKind::List(_) | AttrKind::Set(_), ListMode::Filter) => {
                let items = list(&attr.name, value)?
                    .iter()
                    .map(|v| scalar(&attr.name, v))
                    .collect::<Result<Vec<_>>>()?;
                push_filter(params, filter_index, &filter_name(attr, rule), &items);
                Ok(filter_index + 1)
            }
            (AttrKind::List(_) | AttrKind::Set(_), _) => {
                for (i, item) in list(&attr.name, value)?.iter().enumerate() {
                    params.insert(indexed_key(wire_name, i + 1), scalar(&attr.name, item)?);
                }
                Ok(filter_index)
            }
            (AttrKind::Map(_), _) => {
                let Some(map) = value.as_block() else {
                    return Err(EngineError::mapping(&attr.name, "expected a map value"));
                };
                for (i, (k, v)) in map.iter().enumerate() {
                    params.insert(indexed_sub_key(wire_name, i + 1, "Key"), Value::String(k.clone()));
                    params.insert(indexed_sub_key(wire_name, i + 1, "Value"), scalar(&attr.name, v)?);
                }
                Ok(filter_index)
            }
            (AttrKind::Block { schema, .. }, mode) => {
                let blocks = blocks(&attr.name, value)?;
                match mode {
                    ListMode::Composite => {
                        if let Some(first) = blocks.first() {
                            self.emit_block(&attr.name, schema, first, params, |sub| {
                                format!("{}.{}", wire_name, sub)
                            })?;
                        }
                    }
                    ListMode::FanOut => {
                        for (i, block) in blocks.iter().enumerate() {
                            self.emit_block(&attr.name, schema, block, params, |sub| indexed_key(sub, i + 1))?;
                        }
                    }
                    ListMode::Indexed | ListMode::Filter => {
                        for (i, block) in blocks.iter().enumerate() {
                            self.emit_block(&attr.name, schema, block, params, |sub| {
                                indexed_sub_key(wire_name, i + 1, sub)
                            })?;
                        }
                    }
                }
                Ok(filter_index)
            }
        }
    }

    /// Emit the scalar and scalar-list members of one block element
    fn emit_block<F>(
        &self,
        parent: &str,
        schema: &Schema,
        block: &Block,
        params: &mut WireParams,
        key: F,
    ) -> Result<()>
    where
        F: Fn(&str) -> String,
    {
        for attr in schema.attributes() {
            if attr.is_computed_only() {
                continue;
            }
            let path = format!("{}.{}", parent, attr.name);
            let rule = self.rules.get(&path);
            if rule.map(|r| r.ignore).unwrap_or(false) {
                continue;
            }
            let Some(value) = block.get(&attr.name).filter(|v| !v.is_empty()) else {
                continue;
            };
            let sub = rule
                .and_then(|r| r.rename.clone())
                .unwrap_or_else(|| to_pascal_case(&attr.name));

            match &attr.kind {
                AttrKind::Scalar(_) => {
                    params.insert(key(&sub), scalar(&path, value)?);
                }
                AttrKind::List(_) | AttrKind::Set(_) => {
                    for (j, item) in list(&path, value)?.iter().enumerate() {
                        params.insert(indexed_key(&key(&sub), j + 1), scalar(&path, item)?);
                    }
                }
                AttrKind::Map(_) | AttrKind::Block { .. } => {
                    return Err(EngineError::mapping(
                        &path,
                        "nested maps and blocks below a block need a field function",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn filter_name(attr: &Attribute, rule: &FieldRule) -> String {
    rule.filter_name
        .clone()
        .unwrap_or_else(|| to_kebab_case(&attr.name))
}

fn scalar(path: &str, value: &AttrValue) -> Result<Value> {
    value
        .to_wire()
        .ok_or_else(|| EngineError::mapping(path, "expected a scalar value"))
}

fn list<'v>(path: &str, value: &'v AttrValue) -> Result<&'v [AttrValue]> {
    value
        .as_list()
        .ok_or_else(|| EngineError::mapping(path, "expected a list value"))
}

fn blocks(path: &str, value: &AttrValue) -> Result<Vec<Block>> {
    match value {
        AttrValue::Block(b) => Ok(vec![b.clone()]),
        AttrValue::List(items) => items
            .iter()
            .map(|item| {
                item.as_block()
                    .cloned()
                    .ok_or_else(|| EngineError::mapping(path, "expected a list of blocks"))
            })
            .collect(),
        _ => Err(EngineError::mapping(path, "expected a block value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::schema::ScalarType;
    use crate::engine::transform::{key_value_pairs, tag_filters};
    use serde_json::json;

    fn bws_schema() -> Schema {
        Schema::new()
            .attr(Attribute::new("band_width_share_name", AttrKind::string()))
            .attr(Attribute::new("band_width", AttrKind::int()).required())
            .attr(Attribute::new("line_id", AttrKind::string()).force_new())
            .attr(Attribute::new("charge_type", AttrKind::string()))
            .attr(Attribute::new("create_time", AttrKind::string()).computed())
    }

    fn block(pairs: &[(&str, AttrValue)]) -> Block {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_indexed_list_encoding() {
        let schema = Schema::new().attr(Attribute::new("foo", AttrKind::List(ScalarType::String)));
        let rules = TransformRegistry::new();
        let data = ResourceData::new(block(&[("foo", AttrValue::from(vec!["a", "b", "c"]))]));

        let params = RequestBuilder::new(&schema, &rules).build(&data).unwrap();
        let expected: WireParams = [
            ("Foo.1".to_string(), json!("a")),
            ("Foo.2".to_string(), json!("b")),
            ("Foo.3".to_string(), json!("c")),
        ]
        .into_iter()
        .collect();
        assert_eq!(params, expected);
    }

    #[test]
    fn test_update_only_emits_changed_field() {
        let schema = bws_schema();
        let rules = TransformRegistry::new();
        let prior = block(&[
            ("band_width_share_name", AttrValue::from("share")),
            ("band_width", AttrValue::Int(5)),
            ("line_id", AttrValue::from("line-1")),
            ("charge_type", AttrValue::from("PostPaidByPeak")),
        ]);
        let mut values = prior.clone();
        values.insert("band_width".into(), AttrValue::Int(10));
        let data = ResourceData::existing("bws-1", prior, values);

        let params = RequestBuilder::new(&schema, &rules)
            .update_only(true)
            .build(&data)
            .unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params["BandWidth"], json!(10));
    }

    #[test]
    fn test_force_update_pins_unchanged_field() {
        let schema = bws_schema();
        let rules = TransformRegistry::new().rule("charge_type", FieldRule::new().force_update());
        let prior = block(&[
            ("band_width", AttrValue::Int(5)),
            ("charge_type", AttrValue::from("PostPaidByPeak")),
        ]);
        let mut values = prior.clone();
        values.insert("band_width".into(), AttrValue::Int(10));
        let data = ResourceData::existing("bws-1", prior, values);

        let params = RequestBuilder::new(&schema, &rules)
            .update_only(true)
            .build(&data)
            .unwrap();
        assert_eq!(params["BandWidth"], json!(10));
        assert_eq!(params["ChargeType"], json!("PostPaidByPeak"));
    }

    #[test]
    fn test_ignored_and_computed_fields_are_not_sent() {
        let schema = bws_schema();
        let rules = TransformRegistry::new()
            .rule("line_id", FieldRule::ignored())
            .rule("band_width_share_name", FieldRule::rename("BandWidthShareName"));
        let data = ResourceData::new(block(&[
            ("band_width_share_name", AttrValue::from("share")),
            ("band_width", AttrValue::Int(5)),
            ("line_id", AttrValue::from("line-1")),
            ("create_time", AttrValue::from("2024-01-01")),
        ]));

        let params = RequestBuilder::new(&schema, &rules).build(&data).unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params["BandWidthShareName"], json!("share"));
        assert!(!params.contains_key("LineId"));
        assert!(!params.contains_key("CreateTime"));
    }

    #[test]
    fn test_filter_mode_shares_running_index() {
        let schema = Schema::new()
            .attr(Attribute::new("vpc_id", AttrKind::Set(ScalarType::String)))
            .attr(Attribute::new("subnet_id", AttrKind::string()))
            .attr(Attribute::new("tags", AttrKind::Map(ScalarType::String)));
        let rules = TransformRegistry::new()
            .rule("vpc_id", FieldRule::new().mode(ListMode::Filter))
            .rule("subnet_id", FieldRule::new().filter("subnet-id"))
            .rule("tags", FieldRule::new().field_fn(|emit| tag_filters()(emit)));
        let data = ResourceData::new(block(&[
            ("vpc_id", AttrValue::from(vec!["v1", "v2"])),
            ("subnet_id", AttrValue::from("s1")),
            ("tags", AttrValue::Block(block(&[("env", AttrValue::from("prod"))]))),
        ]));

        let params = RequestBuilder::new(&schema, &rules).build(&data).unwrap();
        // schema order: vpc_id, subnet_id, tags
        assert_eq!(params["Filter.1.Name"], json!("vpc-id"));
        assert_eq!(params["Filter.1.Value.1"], json!("v1"));
        assert_eq!(params["Filter.1.Value.2"], json!("v2"));
        assert_eq!(params["Filter.2.Name"], json!("subnet-id"));
        assert_eq!(params["Filter.2.Value.1"], json!("s1"));
        assert_eq!(params["Filter.3.Name"], json!("tag:env"));
        assert_eq!(params["Filter.3.Value.1"], json!("prod"));
    }

    #[test]
    fn test_block_modes() {
        let disk = Schema::new()
            .attr(Attribute::new("disk_type", AttrKind::string()))
            .attr(Attribute::new("disk_size", AttrKind::int()));
        let schema = Schema::new()
            .attr(Attribute::new("system_disk", AttrKind::single_block(disk.clone())))
            .attr(Attribute::new("data_disks", AttrKind::block(disk.clone())))
            .attr(Attribute::new("extra_disks", AttrKind::block(disk)));
        let rules = TransformRegistry::new()
            .rule("data_disks", FieldRule::new().mode(ListMode::FanOut))
            .rule("extra_disks", FieldRule::rename("ExtraDisk"));

        let disk_block = |t: &str, s: i64| {
            AttrValue::Block(block(&[("disk_type", AttrValue::from(t)), ("disk_size", AttrValue::Int(s))]))
        };
        let data = ResourceData::new(block(&[
            ("system_disk", AttrValue::List(vec![disk_block("SSD", 20)])),
            ("data_disks", AttrValue::List(vec![disk_block("SSD", 50), disk_block("HDD", 100)])),
            ("extra_disks", AttrValue::List(vec![disk_block("EHDD", 10)])),
        ]));

        let params = RequestBuilder::new(&schema, &rules).build(&data).unwrap();
        assert_eq!(params["SystemDisk.DiskType"], json!("SSD"));
        assert_eq!(params["SystemDisk.DiskSize"], json!(20));
        assert_eq!(params["DiskType.1"], json!("SSD"));
        assert_eq!(params["DiskSize.1"], json!(50));
        assert_eq!(params["DiskType.2"], json!("HDD"));
        assert_eq!(params["DiskSize.2"], json!(100));
        assert_eq!(params["ExtraDisk.1.DiskType"], json!("EHDD"));
        assert_eq!(params["ExtraDisk.1.DiskSize"], json!(10));
    }

    #[test]
    fn test_field_fn_fans_out_map() {
        let schema = Schema::new().attr(Attribute::new("tags", AttrKind::Map(ScalarType::String)));
        let kv = key_value_pairs("Key_{n}", "Value_{n}");
        let rules = TransformRegistry::new().rule("tags", FieldRule::new().field_fn(move |emit| kv(emit)));
        let data = ResourceData::new(block(&[(
            "tags",
            AttrValue::Block(block(&[("a", AttrValue::from("1")), ("b", AttrValue::from("2"))])),
        )]));

        let params = RequestBuilder::new(&schema, &rules).build(&data).unwrap();
        assert_eq!(params["Key_1"], json!("a"));
        assert_eq!(params["Value_1"], json!("1"));
        assert_eq!(params["Key_2"], json!("b"));
        assert_eq!(params["Value_2"], json!("2"));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_value_fn_transforms_and_skips() {
        let schema = bws_schema();
        let rules = TransformRegistry::new()
            .rule(
                "band_width",
                FieldRule::new().value_fn(|_, v| Ok(v.as_i64().map(|n| AttrValue::Int(n * 2)))),
            )
            .rule("charge_type", FieldRule::new().value_fn(|_, _| Ok(None)));
        let data = ResourceData::new(block(&[
            ("band_width", AttrValue::Int(5)),
            ("charge_type", AttrValue::from("Daily")),
        ]));

        let params = RequestBuilder::new(&schema, &rules).build(&data).unwrap();
        assert_eq!(params["BandWidth"], json!(10));
        assert!(!params.contains_key("ChargeType"));
    }

    #[test]
    fn test_custom_function_error_is_mapping_error() {
        let schema = bws_schema();
        let rules = TransformRegistry::new().rule(
            "band_width",
            FieldRule::new().value_fn(|_, _| Err(EngineError::mapping("band_width", "bad value"))),
        );
        let data = ResourceData::new(block(&[("band_width", AttrValue::Int(5))]));

        let err = RequestBuilder::new(&schema, &rules).build(&data).unwrap_err();
        assert!(matches!(err, EngineError::Mapping { .. }));
    }

    #[test]
    fn test_nested_value_function_is_refused_before_emitting() {
        let disk = Schema::new().attr(Attribute::new("disk_size", AttrKind::int()));
        let schema = Schema::new().attr(Attribute::new("data_disks", AttrKind::block(disk)));
        let rules = TransformRegistry::new().rule(
            "data_disks.disk_size",
            FieldRule::new().value_fn(|_, v| Ok(v.as_i64().map(|n| AttrValue::Int(n * 1024)))),
        );
        let data = ResourceData::new(block(&[(
            "data_disks",
            AttrValue::List(vec![AttrValue::Block(block(&[("disk_size", AttrValue::Int(50))]))]),
        )]));

        let err = RequestBuilder::new(&schema, &rules).build(&data).unwrap_err();
        assert!(matches!(err, EngineError::Mapping { ref path, .. } if path == "data_disks.disk_size"));
    }

    #[test]
    fn test_rule_for_unknown_path_fails() {
        let schema = bws_schema();
        let rules = TransformRegistry::new().rule("bandwidth", FieldRule::new().force_update());
        let data = ResourceData::new(Block::new());
        assert!(RequestBuilder::new(&schema, &rules).build(&data).is_err());
    }
}
