use std::collections::BTreeMap;

use proptest::prelude::*;
use revkeep::diff::{apply, diff_snapshots};
use revkeep::merge::three_way;
use revkeep::{CancelToken, Snapshot};
use serde_json::Value;

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,4}".prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        Just(Value::Null),
    ]
}

fn snapshot() -> impl Strategy<Value = Snapshot> {
    proptest::collection::btree_map("[a-e]{1,2}", value(), 0..8).prop_map(|entries: BTreeMap<String, Value>| {
        Snapshot::from_entries(entries).expect("generated paths are valid")
    })
}

proptest! {
    #[test]
    fn diff_with_self_is_empty(a in snapshot()) {
        let diff = diff_snapshots(&a, &a, &CancelToken::new()).unwrap();
        prop_assert!(diff.is_empty());
    }

    #[test]
    fn applying_a_diff_reaches_the_newer_snapshot(a in snapshot(), b in snapshot()) {
        let diff = diff_snapshots(&a, &b, &CancelToken::new()).unwrap();
        prop_assert_eq!(apply(&a, &diff).unwrap(), b);
        prop_assert_eq!(
            diff.summary.total,
            diff.added.len() + diff.modified.len() + diff.deleted.len()
        );
    }

    #[test]
    fn one_sided_change_merges_cleanly(base in snapshot(), changed in snapshot()) {
        let cancel = CancelToken::new();
        let changes = diff_snapshots(&base, &changed, &cancel).unwrap();
        let untouched = diff_snapshots(&base, &base, &cancel).unwrap();

        let outcome = three_way(&base, &changes, &untouched, &cancel).unwrap();
        prop_assert!(outcome.conflicts.is_empty());
        prop_assert_eq!(&outcome.merged, &changed);

        let outcome = three_way(&base, &untouched, &changes, &cancel).unwrap();
        prop_assert!(outcome.conflicts.is_empty());
        prop_assert_eq!(outcome.merged, changed);
    }

    #[test]
    fn identical_changes_never_conflict(base in snapshot(), changed in snapshot()) {
        let cancel = CancelToken::new();
        let changes = diff_snapshots(&base, &changed, &cancel).unwrap();
        let outcome = three_way(&base, &changes, &changes, &cancel).unwrap();
        prop_assert!(outcome.conflicts.is_empty());
        prop_assert_eq!(outcome.merged, changed);
    }
}
