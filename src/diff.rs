//! Structural diff between snapshots.
//!
//! Comparison is keyed by path, never positional: the result depends only on
//! the set of `(path, value)` pairs on each side.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::repo::Repository;
use crate::snapshot::Snapshot;

/// Old and new value of a modified path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueChange {
    pub old: Value,
    pub new: Value,
}

/// Counts per change kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub total: usize,
}

/// Difference from one snapshot to another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    /// Paths only in the newer snapshot, with their values
    pub added: BTreeMap<String, Value>,
    pub modified: BTreeMap<String, ValueChange>,
    /// Paths only in the older snapshot, with their former values
    pub deleted: BTreeMap<String, Value>,
    pub summary: DiffSummary,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.summary.total == 0
    }

    /// Every touched path, sorted.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .added
            .keys()
            .chain(self.modified.keys())
            .chain(self.deleted.keys())
            .map(String::as_str)
            .collect();
        paths.sort_unstable();
        paths
    }

    pub fn touches(&self, path: &str) -> bool {
        self.added.contains_key(path)
            || self.modified.contains_key(path)
            || self.deleted.contains_key(path)
    }

    /// Value a touched path ends up with: `Some(None)` for a deletion,
    /// `None` if this diff does not touch the path.
    pub fn resulting(&self, path: &str) -> Option<Option<&Value>> {
        if let Some(value) = self.added.get(path) {
            return Some(Some(value));
        }
        if let Some(change) = self.modified.get(path) {
            return Some(Some(&change.new));
        }
        if self.deleted.contains_key(path) {
            return Some(None);
        }
        None
    }

    fn finish(mut self) -> Self {
        self.summary = DiffSummary {
            added: self.added.len(),
            modified: self.modified.len(),
            deleted: self.deleted.len(),
            total: self.added.len() + self.modified.len() + self.deleted.len(),
        };
        self
    }
}

/// Diff `old` against `new`, checking `cancel` between paths.
pub fn diff_snapshots(old: &Snapshot, new: &Snapshot, cancel: &CancelToken) -> Result<DiffResult> {
    let mut result = DiffResult::default();

    for (path, old_value) in old.iter() {
        cancel.check()?;
        match new.get(path) {
            None => {
                result.deleted.insert(path.to_string(), old_value.clone());
            }
            Some(new_value) if new_value != old_value => {
                result.modified.insert(
                    path.to_string(),
                    ValueChange {
                        old: old_value.clone(),
                        new: new_value.clone(),
                    },
                );
            }
            Some(_) => {}
        }
    }

    for (path, new_value) in new.iter() {
        cancel.check()?;
        if !old.contains(path) {
            result.added.insert(path.to_string(), new_value.clone());
        }
    }

    Ok(result.finish())
}

/// Apply a diff to the snapshot it was computed from.
pub fn apply(base: &Snapshot, diff: &DiffResult) -> Result<Snapshot> {
    let mut changes = BTreeMap::new();
    for path in diff.paths() {
        if let Some(value) = diff.resulting(path) {
            changes.insert(path.to_string(), value.cloned());
        }
    }
    apply_changes(base, &changes)
}

/// Set (`Some`) or remove (`None`) each path.
pub fn apply_changes(base: &Snapshot, changes: &BTreeMap<String, Option<Value>>) -> Result<Snapshot> {
    let mut snapshot = base.clone();
    for (path, change) in changes {
        match change {
            Some(value) => {
                snapshot.insert(path.clone(), value.clone())?;
            }
            None => {
                snapshot.remove(path);
            }
        }
    }
    Ok(snapshot)
}

impl Repository {
    /// Diff two versions of one content item.
    pub fn diff(&self, content_id: &str, version_a: &str, version_b: &str) -> Result<DiffResult> {
        self.diff_with_cancel(content_id, version_a, version_b, &CancelToken::new())
    }

    pub fn diff_with_cancel(
        &self,
        content_id: &str,
        version_a: &str,
        version_b: &str,
        cancel: &CancelToken,
    ) -> Result<DiffResult> {
        let a = self.get_version(content_id, version_a)?;
        let b = if version_a == version_b {
            a.clone()
        } else {
            self.get_version(content_id, version_b)?
        };
        let result = diff_snapshots(&a, &b, cancel)?;
        tracing::debug!(
            content_id,
            version_a,
            version_b,
            total = result.summary.total,
            "computed diff"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snap(value: Value) -> Snapshot {
        Snapshot::from_json(value).unwrap()
    }

    #[test]
    fn classifies_changes() {
        let a = snap(json!({"keep": 1, "edit": "x", "drop": [1]}));
        let b = snap(json!({"keep": 1, "edit": "y", "new": {"k": true}}));

        let diff = diff_snapshots(&a, &b, &CancelToken::new()).unwrap();
        assert_eq!(diff.added.get("new"), Some(&json!({"k": true})));
        assert_eq!(diff.deleted.get("drop"), Some(&json!([1])));
        assert_eq!(
            diff.modified.get("edit"),
            Some(&ValueChange { old: json!("x"), new: json!("y") })
        );
        assert_eq!(
            diff.summary,
            DiffSummary { added: 1, modified: 1, deleted: 1, total: 3 }
        );
        assert_eq!(diff.paths(), vec!["drop", "edit", "new"]);
        assert!(!diff.touches("keep"));
    }

    #[test]
    fn nested_key_order_is_not_a_change() {
        let a = snap(json!({"cell": {"a": 1, "b": 2}}));
        let b = snap(json!({"cell": {"b": 2, "a": 1}}));
        assert!(diff_snapshots(&a, &b, &CancelToken::new()).unwrap().is_empty());
    }

    #[test]
    fn array_order_is_a_change() {
        let a = snap(json!({"cell": [1, 2]}));
        let b = snap(json!({"cell": [2, 1]}));
        let diff = diff_snapshots(&a, &b, &CancelToken::new()).unwrap();
        assert_eq!(diff.summary.modified, 1);
    }

    #[test]
    fn apply_reproduces_target() {
        let a = snap(json!({"cell1": "a", "cell2": "b", "cell3": null}));
        let b = snap(json!({"cell1": "a2", "cell3": null, "cell4": 4}));
        let diff = diff_snapshots(&a, &b, &CancelToken::new()).unwrap();
        assert_eq!(apply(&a, &diff).unwrap(), b);
    }

    #[test]
    fn resulting_value() {
        let a = snap(json!({"x": 1, "y": 2}));
        let b = snap(json!({"x": 5, "z": 3}));
        let diff = diff_snapshots(&a, &b, &CancelToken::new()).unwrap();
        assert_eq!(diff.resulting("x"), Some(Some(&json!(5))));
        assert_eq!(diff.resulting("y"), Some(None));
        assert_eq!(diff.resulting("z"), Some(Some(&json!(3))));
        assert_eq!(diff.resulting("w"), None);
    }

    #[test]
    fn cancelled_diff() {
        let a = snap(json!({"x": 1}));
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            diff_snapshots(&a, &a, &cancel),
            Err(crate::error::Error::Cancelled)
        ));
    }
}
