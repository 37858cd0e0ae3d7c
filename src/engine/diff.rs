//! Set differences for sub-resource collections
//!
//! Repeated blocks that map to separate remote objects (rules, associations)
//! are reconciled by key: new keys are created, vanished keys deleted, and
//! keys present on both sides with different contents modified.

use super::tree::{AttrValue, Block};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct SetDiff<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
    /// `(recorded, desired)`
    pub modified: Vec<(T, T)>,
}

impl<T> Default for SetDiff<T> {
    fn default() -> Self {
        Self {
            added: vec![],
            removed: vec![],
            modified: vec![],
        }
    }
}

impl<T: Clone + PartialEq> SetDiff<T> {
    /// Three-way difference keyed by `key`. Later duplicates of a key win.
    pub fn compute<K, F>(recorded: &[T], desired: &[T], key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K,
    {
        let old: BTreeMap<K, &T> = recorded.iter().map(|t| (key(t), t)).collect();
        let new: BTreeMap<K, &T> = desired.iter().map(|t| (key(t), t)).collect();

        let mut diff = Self::default();
        for (k, n) in &new {
            match old.get(k) {
                None => diff.added.push((*n).clone()),
                Some(o) if *o != *n => diff.modified.push(((*o).clone(), (*n).clone())),
                Some(_) => {}
            }
        }
        for (k, o) in &old {
            if !new.contains_key(k) {
                diff.removed.push((*o).clone());
            }
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Diff two repeated-block values by the listed key attributes
pub fn diff_blocks(recorded: Option<&AttrValue>, desired: Option<&AttrValue>, key_fields: &[&str]) -> SetDiff<Block> {
    let blocks = |v: Option<&AttrValue>| -> Vec<Block> {
        v.and_then(AttrValue::as_list)
            .map(|items| items.iter().filter_map(AttrValue::as_block).cloned().collect())
            .unwrap_or_default()
    };
    let key = |b: &Block| -> Vec<String> {
        key_fields
            .iter()
            .map(|f| match b.get(*f) {
                Some(AttrValue::String(s)) => s.clone(),
                Some(other) => other.to_json().to_string(),
                None => String::new(),
            })
            .collect()
    };
    SetDiff::compute(&blocks(recorded), &blocks(desired), key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(cidr: &str, port: i64, desc: &str) -> AttrValue {
        let mut b = Block::new();
        b.insert("cidr_block".into(), AttrValue::from(cidr));
        b.insert("port".into(), AttrValue::Int(port));
        b.insert("description".into(), AttrValue::from(desc));
        AttrValue::Block(b)
    }

    #[test]
    fn test_three_way_diff() {
        let recorded = AttrValue::List(vec![rule("10.0.0.0/8", 22, "ssh"), rule("0.0.0.0/0", 80, "web")]);
        let desired = AttrValue::List(vec![rule("0.0.0.0/0", 80, "http"), rule("0.0.0.0/0", 443, "tls")]);

        let diff = diff_blocks(Some(&recorded), Some(&desired), &["cidr_block", "port"]);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0]["port"], AttrValue::Int(443));
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0]["port"], AttrValue::Int(22));
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].1["description"], AttrValue::from("http"));
    }

    #[test]
    fn test_identical_sets_are_empty() {
        let v = AttrValue::List(vec![rule("10.0.0.0/8", 22, "ssh")]);
        assert!(diff_blocks(Some(&v), Some(&v), &["cidr_block"]).is_empty());
    }

    #[test]
    fn test_absent_recorded_means_all_added() {
        let desired = AttrValue::List(vec![rule("10.0.0.0/8", 22, "ssh")]);
        let diff = diff_blocks(None, Some(&desired), &["cidr_block"]);
        assert_eq!(diff.added.len(), 1);
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn test_compute_on_plain_values() {
        let diff = SetDiff::compute(&["a", "b"], &["b", "c"], |s| s.to_string());
        assert_eq!(diff.added, vec!["c"]);
        assert_eq!(diff.removed, vec!["a"]);
    }
}
