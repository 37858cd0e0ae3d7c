//! Wire parameter encoding
//!
//! The remote API only accepts flat maps. Repeated values use 1-based index
//! suffixes (`Foo.1`, `Foo.2`), repeated composites `Foo.1.Bar`, and filters
//! a two-level index (`Filter.1.Name`, `Filter.1.Value.1`).

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Flat, ordered wire parameter map
pub type WireParams = BTreeMap<String, Value>;

/// Sentinel parameter that turns a call into a dry run
pub const DRY_RUN_PARAM: &str = "DryRun";

/// `Foo.3`
pub fn indexed_key(name: &str, index: usize) -> String {
    format!("{}.{}", name, index)
}

/// `Foo.3.Bar`
pub fn indexed_sub_key(name: &str, index: usize, sub: &str) -> String {
    format!("{}.{}.{}", name, index, sub)
}

/// Emit `Filter.N.Name` / `Filter.N.Value.M` for one filter
pub fn push_filter(params: &mut WireParams, index: usize, name: &str, values: &[Value]) {
    params.insert(format!("Filter.{}.Name", index), Value::String(name.to_string()));
    for (m, value) in values.iter().enumerate() {
        params.insert(format!("Filter.{}.Value.{}", index, m + 1), value.clone());
    }
}

/// Next free filter index in a map that may already carry filters
pub fn next_filter_index(params: &WireParams) -> usize {
    params
        .keys()
        .filter_map(|k| k.strip_prefix("Filter."))
        .filter_map(|rest| rest.split('.').next())
        .filter_map(|n| n.parse::<usize>().ok())
        .max()
        .map(|n| n + 1)
        .unwrap_or(1)
}

/// True if the map already carries `Name` or any `Name.N`
pub fn has_param(params: &WireParams, name: &str) -> bool {
    let prefix = format!("{}.", name);
    params.keys().any(|k| k == name || k.starts_with(&prefix))
}

/// Collect `Name.1`, `Name.2`, ... into a vector, in index order
pub fn indexed_values(params: &WireParams, name: &str) -> Vec<Value> {
    let prefix = format!("{}.", name);
    let mut found: Vec<(usize, Value)> = params
        .iter()
        .filter_map(|(k, v)| {
            let idx = k.strip_prefix(&prefix)?.parse::<usize>().ok()?;
            Some((idx, v.clone()))
        })
        .collect();
    found.sort_by_key(|(idx, _)| *idx);
    found.into_iter().map(|(_, v)| v).collect()
}

/// Rebuild the nested object a flat map describes.
///
/// Numeric segments become (1-based) array positions, other segments object
/// keys, so `{"Foo.1.Bar": x}` turns into `{"Foo": [{"Bar": x}]}`.
pub fn unflatten(params: &WireParams) -> Value {
    let mut root = Value::Object(Map::new());
    for (key, value) in params {
        let parts: Vec<&str> = key.split('.').collect();
        insert_path(&mut root, &parts, value.clone());
    }
    root
}

fn insert_path(node: &mut Value, parts: &[&str], value: Value) {
    let Some((head, rest)) = parts.split_first() else {
        *node = value;
        return;
    };

    if let Ok(idx) = head.parse::<usize>() {
        if !node.is_array() {
            *node = Value::Array(vec![]);
        }
        if let Value::Array(items) = node {
            let pos = idx.saturating_sub(1);
            while items.len() <= pos {
                items.push(Value::Null);
            }
            insert_path(&mut items[pos], rest, value);
        }
    } else {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        if let Value::Object(map) = node {
            let child = map.entry(head.to_string()).or_insert(Value::Null);
            insert_path(child, rest, value);
        }
    }
}

/// Render a wire value as a query-string value
pub fn wire_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Query pairs in key order
pub fn to_query_pairs(params: &WireParams) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), wire_value_to_string(v)))
        .collect()
}
