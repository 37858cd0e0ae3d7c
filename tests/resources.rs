//! Resource flows end to end against an in-memory cloud
//!
//! Create, update, replace, delete and list bandwidth shares through the
//! same provider the CLI builds, with the HTTP client swapped for a
//! scripted executor.

mod common;

use cloudrecon::engine::{AttrValue, Block, ResourceData, WireParams};
use cloudrecon::error::{ActionError, EngineError};
use cloudrecon::resource::{self, Provider};
use common::{is_dry_run, project_listing, share_listing, ScriptedExecutor};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Remote side: bandwidth shares, their tags and the number of delete
/// attempts that fail with "in use" before succeeding
#[derive(Default, Clone)]
struct Cloud {
    shares: Vec<Value>,
    tags: Vec<(String, String, String)>,
    next_id: usize,
    busy_deletes: usize,
}

fn indexed(params: &WireParams, name: &str) -> Vec<String> {
    (1..)
        .map_while(|i| params.get(&format!("{}.{}", name, i)))
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn str_param(params: &WireParams, name: &str) -> String {
    match params.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Dry runs are played against a copy of the cloud, so they fail exactly
/// where the real call would and answer 412 otherwise
fn handle(cloud: &Mutex<Cloud>, action: &str, params: &WireParams) -> Result<Value, ActionError> {
    if is_dry_run(params) {
        let mut scratch = cloud.lock().unwrap().clone();
        return match apply(&mut scratch, action, params) {
            Ok(_) => Err(ActionError::dry_run_passed()),
            Err(e) => Err(e),
        };
    }
    apply(&mut cloud.lock().unwrap(), action, params)
}

fn apply(cloud: &mut Cloud, action: &str, params: &WireParams) -> Result<Value, ActionError> {
    match action {
        "CreateBandWidthShare" => {
            cloud.next_id += 1;
            let id = format!("bws-{}", cloud.next_id);
            cloud.shares.push(json!({
                "BandWidthShareId": id,
                "BandWidthShareName": params.get("BandWidthShareName").cloned().unwrap_or(json!("")),
                "BandWidth": params.get("BandWidth").cloned().unwrap_or(json!(1)),
                "ChargeType": params.get("ChargeType").cloned().unwrap_or(json!("")),
                "LineId": "line-bgp",
                "ProjectId": "0",
                "CreateTime": "2026-10-19 10:00:00",
                "AssociateBandWidthShareInfoSet": []
            }));
            Ok(json!({ "BandWidthShareId": id, "RequestId": "req-create" }))
        }
        "ModifyBandWidthShare" => {
            let id = str_param(params, "BandWidthShareId");
            let share = cloud
                .shares
                .iter_mut()
                .find(|s| s["BandWidthShareId"] == id.as_str())
                .ok_or_else(|| ActionError::not_found(format!("{} does not exist", id)))?;
            for field in ["BandWidth", "BandWidthShareName"] {
                if let Some(v) = params.get(field) {
                    share[field] = v.clone();
                }
            }
            Ok(json!({ "Return": true }))
        }
        "DeleteBandWidthShare" => {
            let id = str_param(params, "BandWidthShareId");
            if cloud.busy_deletes > 0 {
                cloud.busy_deletes -= 1;
                return Err(ActionError::classify(
                    Some(400),
                    Some("BandWidthShareInUse".into()),
                    "bandwidth share has associated EIPs",
                ));
            }
            let before = cloud.shares.len();
            cloud.shares.retain(|s| s["BandWidthShareId"] != id.as_str());
            if cloud.shares.len() == before {
                return Err(ActionError::not_found(format!("{} does not exist", id)));
            }
            Ok(json!({ "Return": true }))
        }
        "AssociateBandWidthShare" => {
            let id = str_param(params, "BandWidthShareId");
            let allocation = str_param(params, "AllocationId");
            let share = cloud
                .shares
                .iter_mut()
                .find(|s| s["BandWidthShareId"] == id.as_str())
                .ok_or_else(|| ActionError::not_found(format!("{} does not exist", id)))?;
            if let Some(set) = share["AssociateBandWidthShareInfoSet"].as_array_mut() {
                set.push(json!({ "AllocationId": allocation, "EipAddress": "10.0.0.1", "BandWidth": 0 }));
            }
            Ok(json!({ "Return": true }))
        }
        "DisassociateBandWidthShare" => {
            let id = str_param(params, "BandWidthShareId");
            let allocation = str_param(params, "AllocationId");
            let set = cloud
                .shares
                .iter_mut()
                .find(|s| s["BandWidthShareId"] == id.as_str())
                .and_then(|s| s["AssociateBandWidthShareInfoSet"].as_array_mut())
                .ok_or_else(|| ActionError::not_found(format!("{} does not exist", id)))?;
            let before = set.len();
            set.retain(|a| a["AllocationId"] != allocation.as_str());
            if set.len() == before {
                return Err(ActionError::not_found(format!("{} is not associated", allocation)));
            }
            Ok(json!({ "Return": true }))
        }
        "DescribeBandWidthShares" => {
            let ids = indexed(params, "BandWidthShareId");
            let matching: Vec<Value> = cloud
                .shares
                .iter()
                .filter(|s| ids.is_empty() || ids.iter().any(|id| s["BandWidthShareId"] == id.as_str()))
                .cloned()
                .collect();

            let start: usize = str_param(params, "NextToken").parse().unwrap_or(0);
            let limit = params.get("MaxResults").and_then(Value::as_u64).unwrap_or(1000) as usize;
            let page: Vec<Value> = matching.iter().skip(start).take(limit).cloned().collect();
            let mut response = share_listing(page);
            if start + limit < matching.len() {
                response["NextToken"] = json!((start + limit).to_string());
            }
            Ok(response)
        }
        "ListTagsByResourceIds" => {
            let ids: Vec<String> = str_param(params, "ResourceUuids").split(',').map(str::to_string).collect();
            let set: Vec<Value> = cloud
                .tags
                .iter()
                .filter(|(id, _, _)| ids.contains(id))
                .map(|(id, k, v)| json!({ "ResourceUuid": id, "TagKey": k, "TagValue": v }))
                .collect();
            Ok(json!({ "TagSet": set }))
        }
        "ReplaceResourcesTags" => {
            let id = str_param(params, "ResourceUuids");
            cloud.tags.retain(|(r, _, _)| *r != id);
            for n in 1.. {
                let Some(key) = params.get(&format!("ReplaceTags.{}.Key", n)).and_then(Value::as_str) else {
                    break;
                };
                let value = str_param(params, &format!("ReplaceTags.{}.Value", n));
                cloud.tags.push((id.clone(), key.to_string(), value));
            }
            Ok(json!({ "Return": true }))
        }
        "GetAccountAllProjectList" => Ok(project_listing()),
        other => Err(ActionError::classify(Some(400), Some("InvalidAction".into()), other)),
    }
}

fn setup(cloud: Cloud) -> (Arc<Mutex<Cloud>>, Arc<ScriptedExecutor>, Provider) {
    let cloud = Arc::new(Mutex::new(cloud));
    let state = cloud.clone();
    let executor = Arc::new(ScriptedExecutor::new(move |action, params| handle(&state, action, params)));
    let provider = Provider::new(executor.clone()).with_poll_interval(Duration::from_millis(5));
    (cloud, executor, provider)
}

fn block(value: Value) -> Block {
    serde_json::from_value(value).unwrap()
}

fn existing_share() -> Value {
    json!({
        "BandWidthShareId": "bws-1",
        "BandWidthShareName": "shared",
        "BandWidth": 5,
        "ChargeType": "PostPaidByPeak",
        "LineId": "line-bgp",
        "ProjectId": "0",
        "CreateTime": "2026-10-19 10:00:00",
        "AssociateBandWidthShareInfoSet": []
    })
}

fn recorded_share() -> Block {
    block(json!({
        "band_width_share_id": "bws-1",
        "band_width_share_name": "shared",
        "band_width": 5,
        "charge_type": "PostPaidByPeak",
        "line_id": "line-bgp",
        "project_id": "0",
        "create_time": "2026-10-19 10:00:00",
        "tags": {"env": "dev"}
    }))
}

#[tokio::test]
async fn test_create_bandwidth_share() {
    let (cloud, executor, provider) = setup(Cloud::default());
    let share = resource::lookup("bandwidth_share").unwrap();
    let mut data = ResourceData::new(block(json!({
        "band_width_share_name": "shared",
        "band_width": 5,
        "charge_type": "PostPaidByPeak",
        "tags": {"env": "dev"}
    })));

    resource::apply(share.as_ref(), &provider, &mut data).await.unwrap();

    assert_eq!(data.id(), Some("bws-1"));
    assert_eq!(data.get_str("band_width_share_id"), Some("bws-1"));
    assert_eq!(data.get_str("line_id"), Some("line-bgp"));
    assert_eq!(data.get_str("create_time"), Some("2026-10-19 10:00:00"));
    assert_eq!(data.prior(), data.values());

    let creates = executor.real_calls("CreateBandWidthShare");
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0]["BandWidth"], json!(5));
    assert_eq!(creates[0]["ChargeType"], json!("PostPaidByPeak"));
    assert!(creates[0].keys().all(|k| !k.starts_with("Tags")));

    let tag = &executor.real_calls("ReplaceResourcesTags")[0];
    assert_eq!(tag["ReplaceTags.1.Key"], json!("env"));
    assert_eq!(tag["ReplaceTags.1.Value"], json!("dev"));
    assert_eq!(cloud.lock().unwrap().tags.len(), 1);

    let tags = data.get("tags").and_then(AttrValue::as_block).unwrap();
    assert_eq!(tags.get("env").and_then(AttrValue::as_str), Some("dev"));
}

#[tokio::test]
async fn test_update_band_width_sends_only_changed_field() {
    let (cloud, executor, provider) = setup(Cloud {
        shares: vec![existing_share()],
        tags: vec![("bws-1".into(), "env".into(), "dev".into())],
        ..Cloud::default()
    });
    let share = resource::lookup("bandwidth_share").unwrap();
    let prior = recorded_share();
    let mut desired = prior.clone();
    desired.insert("band_width".into(), AttrValue::Int(10));
    let mut data = ResourceData::existing("bws-1", prior, desired);

    resource::apply(share.as_ref(), &provider, &mut data).await.unwrap();

    let modifies = executor.real_calls("ModifyBandWidthShare");
    assert_eq!(modifies.len(), 1);
    let mut expected = WireParams::new();
    expected.insert("BandWidth".into(), json!(10));
    expected.insert("BandWidthShareId".into(), json!("bws-1"));
    assert_eq!(modifies[0], expected);

    assert!(executor.real_calls("ReplaceResourcesTags").is_empty());
    assert!(executor.real_calls("CreateBandWidthShare").is_empty());
    assert_eq!(data.get_i64("band_width"), Some(10));
    assert_eq!(cloud.lock().unwrap().shares[0]["BandWidth"], json!(10));
}

#[tokio::test]
async fn test_update_without_changes_sends_nothing() {
    let (_cloud, executor, provider) = setup(Cloud {
        shares: vec![existing_share()],
        tags: vec![("bws-1".into(), "env".into(), "dev".into())],
        ..Cloud::default()
    });
    let share = resource::lookup("bandwidth_share").unwrap();
    let prior = recorded_share();
    let mut data = ResourceData::existing("bws-1", prior.clone(), prior);

    resource::apply(share.as_ref(), &provider, &mut data).await.unwrap();

    assert!(executor
        .actions()
        .iter()
        .all(|a| a == "DescribeBandWidthShares" || a == "ListTagsByResourceIds"));
}

#[tokio::test]
async fn test_tag_change_replaces_tags() {
    let (cloud, executor, provider) = setup(Cloud {
        shares: vec![existing_share()],
        tags: vec![("bws-1".into(), "env".into(), "dev".into())],
        ..Cloud::default()
    });
    let share = resource::lookup("bandwidth_share").unwrap();
    let prior = recorded_share();
    let mut desired = prior.clone();
    desired.insert("tags".into(), AttrValue::Block(block(json!({"env": "prod", "team": "net"}))));
    let mut data = ResourceData::existing("bws-1", prior, desired);

    resource::apply(share.as_ref(), &provider, &mut data).await.unwrap();

    assert!(executor.real_calls("ModifyBandWidthShare").is_empty());
    assert_eq!(executor.real_calls("ReplaceResourcesTags").len(), 1);
    let mut tags = cloud.lock().unwrap().tags.clone();
    tags.sort();
    assert_eq!(
        tags,
        vec![
            ("bws-1".to_string(), "env".to_string(), "prod".to_string()),
            ("bws-1".to_string(), "team".to_string(), "net".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_force_new_change_replaces_share() {
    let (cloud, executor, provider) = setup(Cloud {
        shares: vec![existing_share()],
        next_id: 1,
        ..Cloud::default()
    });
    let share = resource::lookup("bandwidth_share").unwrap();
    let prior = recorded_share();
    let mut desired = prior.clone();
    desired.insert("charge_type".into(), AttrValue::from("Peak"));
    let mut data = ResourceData::existing("bws-1", prior, desired);

    resource::apply(share.as_ref(), &provider, &mut data).await.unwrap();

    let actions: Vec<String> = executor
        .calls()
        .into_iter()
        .filter(|(a, p)| !is_dry_run(p) && (a == "DeleteBandWidthShare" || a == "CreateBandWidthShare"))
        .map(|(a, _)| a)
        .collect();
    assert_eq!(actions, vec!["DeleteBandWidthShare", "CreateBandWidthShare"]);
    assert_eq!(data.id(), Some("bws-2"));
    assert_eq!(cloud.lock().unwrap().shares.len(), 1);
}

#[tokio::test]
async fn test_delete_retries_while_in_use() {
    let (cloud, executor, provider) = setup(Cloud {
        shares: vec![existing_share()],
        busy_deletes: 2,
        ..Cloud::default()
    });
    let share = resource::lookup("bandwidth_share").unwrap();
    let mut data = ResourceData::existing("bws-1", recorded_share(), recorded_share());

    share.delete(&provider, &mut data).await.unwrap();

    assert_eq!(data.id(), None);
    // The dry run hits the same "in use" answer and hands over to the retry
    let dry: Vec<_> = executor
        .calls()
        .into_iter()
        .filter(|(a, p)| a == "DeleteBandWidthShare" && is_dry_run(p))
        .collect();
    assert_eq!(dry.len(), 1);
    assert_eq!(executor.real_calls("DeleteBandWidthShare").len(), 3);
    assert!(cloud.lock().unwrap().shares.is_empty());
    // Existence is checked across every project of the account
    let describes = executor.real_calls("DescribeBandWidthShares");
    assert!(describes.iter().all(|p| p.get("ProjectId.1") == Some(&json!("0"))));
}

#[tokio::test]
async fn test_delete_of_missing_share_succeeds() {
    let (_cloud, executor, provider) = setup(Cloud::default());
    let share = resource::lookup("bandwidth_share").unwrap();
    let mut data = ResourceData::existing("bws-1", Block::new(), Block::new());

    share.delete(&provider, &mut data).await.unwrap();
    assert_eq!(data.id(), None);
    assert_eq!(executor.actions()[0], "DeleteBandWidthShare");
    assert!(is_dry_run(&executor.calls()[0].1));
    assert_eq!(executor.real_calls("DeleteBandWidthShare").len(), 1);
}

#[tokio::test]
async fn test_delete_waits_until_share_disappears() {
    let (_cloud, executor, provider) = setup(Cloud {
        shares: vec![existing_share()],
        ..Cloud::default()
    });
    let share = resource::lookup("bandwidth_share").unwrap();
    let mut data = ResourceData::existing("bws-1", recorded_share(), recorded_share());

    share.delete(&provider, &mut data).await.unwrap();

    let actions = executor.actions();
    let delete_at = actions.iter().rposition(|a| a == "DeleteBandWidthShare").unwrap();
    assert_eq!(actions[delete_at + 1..].first().map(String::as_str), Some("GetAccountAllProjectList"));
    assert!(actions[delete_at + 1..].iter().any(|a| a == "DescribeBandWidthShares"));
}

#[tokio::test]
async fn test_disassociate_of_missing_association_succeeds() {
    let (_cloud, executor, provider) = setup(Cloud {
        shares: vec![existing_share()],
        ..Cloud::default()
    });
    let association = resource::lookup("bws_associate").unwrap();
    let mut data = ResourceData::existing(
        "bws-1:eip-9",
        block(json!({"band_width_share_id": "bws-1", "allocation_id": "eip-9", "band_width": 0})),
        block(json!({"band_width_share_id": "bws-1", "allocation_id": "eip-9"})),
    );

    association.delete(&provider, &mut data).await.unwrap();

    assert_eq!(data.id(), None);
    assert_eq!(executor.real_calls("DisassociateBandWidthShare").len(), 1);
}

#[tokio::test]
async fn test_read_missing_share_drops_id() {
    let (_cloud, _executor, provider) = setup(Cloud::default());
    let share = resource::lookup("bandwidth_share").unwrap();
    let mut data = ResourceData::existing("bws-404", recorded_share(), recorded_share());

    share.read(&provider, &mut data).await.unwrap();
    assert_eq!(data.id(), None);
}

#[tokio::test]
async fn test_update_of_vanished_share_is_not_found() {
    let (_cloud, _executor, provider) = setup(Cloud::default());
    let share = resource::lookup("bandwidth_share").unwrap();
    let prior = recorded_share();
    let mut desired = prior.clone();
    desired.insert("band_width_share_name".into(), AttrValue::from("renamed"));
    let mut data = ResourceData::existing("bws-1", prior, desired);

    let err = share.update(&provider, &mut data).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn test_associate_and_disassociate() {
    let (cloud, executor, provider) = setup(Cloud {
        shares: vec![existing_share()],
        ..Cloud::default()
    });
    let association = resource::lookup("bws_associate").unwrap();
    let mut data = ResourceData::new(block(json!({
        "band_width_share_id": "bws-1",
        "allocation_id": "eip-1"
    })));

    resource::apply(association.as_ref(), &provider, &mut data).await.unwrap();
    assert_eq!(data.id(), Some("bws-1:eip-1"));
    assert_eq!(data.get_i64("band_width"), Some(0));

    association.delete(&provider, &mut data).await.unwrap();
    assert_eq!(data.id(), None);

    let disassociate = &executor.real_calls("DisassociateBandWidthShare")[0];
    assert_eq!(disassociate["BandWidth"], json!(1));
    assert_eq!(disassociate["AllocationId"], json!("eip-1"));
    assert!(cloud.lock().unwrap().shares[0]["AssociateBandWidthShareInfoSet"]
        .as_array()
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_list_shares_pages_and_filters() {
    let shares: Vec<Value> = (1..=130)
        .map(|n| {
            let mut share = existing_share();
            share["BandWidthShareId"] = json!(format!("bws-{}", n));
            share["BandWidthShareName"] = json!(if n % 2 == 0 { format!("prod-{}", n) } else { format!("test-{}", n) });
            share
        })
        .collect();
    let (_cloud, executor, provider) = setup(Cloud {
        shares,
        ..Cloud::default()
    });
    let listing = resource::lookup("bandwidth_shares").unwrap();
    let output = std::env::temp_dir().join(format!("cloudrecon-list-{}.json", std::process::id()));
    let mut data = ResourceData::new(block(json!({
        "name_regex": "^prod-",
        "output_file": output.to_string_lossy()
    })));

    listing.read(&provider, &mut data).await.unwrap();

    assert_eq!(data.get_i64("total_count"), Some(65));
    let id = data.id().unwrap();
    assert_eq!(id.len(), 16);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

    let pages = executor.real_calls("DescribeBandWidthShares");
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[1]["NextToken"], json!("100"));

    let written: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(written.len(), 65);
    assert!(written[0]["band_width_share_name"].as_str().unwrap().starts_with("prod-"));
    let _ = std::fs::remove_file(&output);
}

#[tokio::test]
async fn test_list_shares_by_ids() {
    let (_cloud, executor, provider) = setup(Cloud {
        shares: vec![existing_share()],
        ..Cloud::default()
    });
    let listing = resource::lookup("bandwidth_shares").unwrap();
    let mut data = ResourceData::new(block(json!({ "ids": ["bws-1"] })));

    listing.read(&provider, &mut data).await.unwrap();

    assert_eq!(data.get_i64("total_count"), Some(1));
    assert_eq!(executor.real_calls("DescribeBandWidthShares")[0]["BandWidthShareId.1"], json!("bws-1"));
    let items = data.get("band_width_shares").and_then(AttrValue::as_list).unwrap();
    let first = items[0].as_block().unwrap();
    assert_eq!(first.get("band_width").and_then(AttrValue::as_i64), Some(5));
}

#[tokio::test]
async fn test_invalid_name_regex_is_mapping_error() {
    let (_cloud, _executor, provider) = setup(Cloud {
        shares: vec![existing_share()],
        ..Cloud::default()
    });
    let listing = resource::lookup("bandwidth_shares").unwrap();
    let mut data = ResourceData::new(block(json!({ "name_regex": "([" })));

    let err = listing.read(&provider, &mut data).await.unwrap_err();
    assert!(matches!(err, EngineError::Mapping { .. }));
}
