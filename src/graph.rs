//! Commit graph: versions, history walks and merge bases.
//!
//! Versions form a DAG through `parent_ids`. A version id is a hash over
//! its parents, so a version can never (transitively) be its own parent:
//! the graph is acyclic by construction and no cycle detection is needed.

use std::collections::{BTreeSet, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::snapshot::{to_hex, ContentType, Snapshot};
use crate::store::{ContentRecord, ContentStore};

/// Hex SHA-256 identifying a version.
pub type VersionId = String;

/// An immutable commit in a content item's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub version_id: VersionId,
    pub content_id: String,
    pub content_type: ContentType,
    /// Empty for the root, one for commits, two for merges (`[target, source]`)
    pub parent_ids: Vec<VersionId>,
    pub author_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Hex SHA-256 of the canonical snapshot bytes
    pub checksum: String,
    /// Canonical snapshot size in bytes
    pub size: u64,
}

impl Version {
    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parent_ids.len() > 1
    }

    /// Parent on the branch's own lineage
    pub fn first_parent(&self) -> Option<&str> {
        self.parent_ids.first().map(String::as_str)
    }

    /// First 12 characters of the id, for messages.
    pub fn short_id(&self) -> &str {
        short_id(&self.version_id)
    }
}

pub fn short_id(version_id: &str) -> &str {
    version_id.get(..12).unwrap_or(version_id)
}

/// Derive a version id.
///
/// SHA-256 over the content id, the ordered parent ids, the snapshot
/// checksum and the timestamp bucket, each field newline-terminated.
pub fn compute_version_id(
    content_id: &str,
    parent_ids: &[VersionId],
    checksum: &str,
    timestamp: DateTime<Utc>,
    bucket_ms: u64,
) -> VersionId {
    let bucket = timestamp
        .timestamp_millis()
        .div_euclid(bucket_ms.max(1) as i64);

    let mut hasher = Sha256::new();
    hasher.update(content_id.as_bytes());
    hasher.update(b"\n");
    for parent in parent_ids {
        hasher.update(parent.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(b"---\n");
    hasher.update(checksum.as_bytes());
    hasher.update(b"\n");
    hasher.update(bucket.to_string().as_bytes());
    hasher.update(b"\n");

    to_hex(&hasher.finalize())
}

/// Fields of a version about to be written.
#[derive(Debug, Clone)]
pub struct NewVersion<'a> {
    pub parent_ids: Vec<VersionId>,
    pub snapshot: &'a Snapshot,
    pub author_id: &'a str,
    pub message: &'a str,
    pub timestamp: DateTime<Utc>,
}

/// Read/write access to one store's commit graph.
pub struct CommitGraph<'a> {
    store: &'a ContentStore,
    bucket_ms: u64,
}

impl<'a> CommitGraph<'a> {
    pub fn new(store: &'a ContentStore, bucket_ms: u64) -> Self {
        Self { store, bucket_ms }
    }

    /// Write the snapshot, then the version record.
    ///
    /// Does not move any branch: callers advance heads only after this
    /// returns, so a failure here never leaves a head pointing at a missing
    /// version.
    pub fn write_version(&self, content: &ContentRecord, new: NewVersion<'_>) -> Result<Version> {
        let (checksum, size) = self.store.put_snapshot(&content.content_id, new.snapshot)?;
        let version_id = compute_version_id(
            &content.content_id,
            &new.parent_ids,
            &checksum,
            new.timestamp,
            self.bucket_ms,
        );

        let version = Version {
            version_id,
            content_id: content.content_id.clone(),
            content_type: content.content_type,
            parent_ids: new.parent_ids,
            author_id: new.author_id.to_string(),
            message: new.message.to_string(),
            timestamp: new.timestamp,
            checksum,
            size,
        };

        self.store.put_version(&version)
    }

    pub fn snapshot_of(&self, version: &Version) -> Result<Snapshot> {
        self.store.get_snapshot(&version.content_id, &version.checksum)
    }

    /// First-parent walk from `head` to the root.
    pub fn history(&self, content_id: &str, head: &str, limit: Option<usize>) -> Result<Vec<Version>> {
        let mut history = Vec::new();
        let mut next = Some(head.to_string());

        while let Some(version_id) = next {
            if limit.is_some_and(|limit| history.len() >= limit) {
                break;
            }
            let version = self.store.require_version(content_id, &version_id)?;
            next = version.first_parent().map(str::to_string);
            history.push(version);
        }

        tracing::debug!(content_id, head, len = history.len(), "walked history");
        Ok(history)
    }

    /// Every version reachable from `version_id` through any parent, itself included.
    pub fn ancestors(&self, content_id: &str, version_id: &str) -> Result<BTreeSet<VersionId>> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([version_id.to_string()]);

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let version = self.store.require_version(content_id, &id)?;
            queue.extend(version.parent_ids);
        }

        Ok(seen)
    }

    pub fn is_ancestor(&self, content_id: &str, ancestor: &str, descendant: &str) -> Result<bool> {
        Ok(self.ancestors(content_id, descendant)?.contains(ancestor))
    }

    /// Merge base of two versions.
    ///
    /// Bidirectional BFS: both sides expand one level at a time, each
    /// tracking the set of ancestors it has visited. The first version that
    /// shows up in both visited sets is the base; when several meet in the
    /// same level the lowest id wins so the result is deterministic.
    /// Returns `None` for disjoint histories.
    pub fn merge_base(
        &self,
        content_id: &str,
        a: &str,
        b: &str,
        cancel: &CancelToken,
    ) -> Result<Option<VersionId>> {
        if a == b {
            return Ok(Some(a.to_string()));
        }

        let mut side_a = Frontier::new(a);
        let mut side_b = Frontier::new(b);

        while !side_a.is_exhausted() || !side_b.is_exhausted() {
            cancel.check()?;
            if let Some(base) = side_a.expand(self.store, content_id, &side_b.visited)? {
                return Ok(Some(base));
            }
            cancel.check()?;
            if let Some(base) = side_b.expand(self.store, content_id, &side_a.visited)? {
                return Ok(Some(base));
            }
        }

        Ok(None)
    }
}

struct Frontier {
    visited: HashSet<VersionId>,
    current: Vec<VersionId>,
}

impl Frontier {
    fn new(start: &str) -> Self {
        Self {
            visited: HashSet::from([start.to_string()]),
            current: vec![start.to_string()],
        }
    }

    fn is_exhausted(&self) -> bool {
        self.current.is_empty()
    }

    /// Advance one level; return the lowest newly visited id the other side has seen.
    fn expand(
        &mut self,
        store: &ContentStore,
        content_id: &str,
        other: &HashSet<VersionId>,
    ) -> Result<Option<VersionId>> {
        let mut next = Vec::new();
        let mut meeting: Option<VersionId> = None;

        for id in std::mem::take(&mut self.current) {
            let version = store.require_version(content_id, &id)?;
            for parent in version.parent_ids {
                if !self.visited.insert(parent.clone()) {
                    continue;
                }
                if other.contains(&parent) && meeting.as_ref().map_or(true, |best| parent < *best) {
                    meeting = Some(parent.clone());
                }
                next.push(parent);
            }
        }

        self.current = next;
        Ok(meeting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Arc;

    fn fixture() -> (ContentStore, ContentRecord) {
        let store = ContentStore::new(Arc::new(MemoryStore::new()));
        let content = ContentRecord {
            content_id: "nb1".to_string(),
            content_type: ContentType::Notebook,
            default_branch: "main".to_string(),
            created_at: Utc::now(),
            commit_count: 0,
        };
        (store, content)
    }

    fn write(
        graph: &CommitGraph<'_>,
        content: &ContentRecord,
        parents: &[&Version],
        cell: &str,
    ) -> Version {
        let snapshot = Snapshot::from_json(json!({ "cell": cell })).unwrap();
        graph
            .write_version(
                content,
                NewVersion {
                    parent_ids: parents.iter().map(|p| p.version_id.clone()).collect(),
                    snapshot: &snapshot,
                    author_id: "u1",
                    message: cell,
                    timestamp: Utc::now(),
                },
            )
            .unwrap()
    }

    #[test]
    fn version_id_is_deterministic() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later_same_bucket = ts + chrono::Duration::milliseconds(400);
        let next_bucket = ts + chrono::Duration::milliseconds(1000);
        let parents = vec!["p1".to_string()];

        let a = compute_version_id("nb1", &parents, "abc", ts, 1000);
        assert_eq!(a, compute_version_id("nb1", &parents, "abc", later_same_bucket, 1000));
        assert_ne!(a, compute_version_id("nb1", &parents, "abc", next_bucket, 1000));
        assert_ne!(a, compute_version_id("nb2", &parents, "abc", ts, 1000));
        assert_ne!(a, compute_version_id("nb1", &[], "abc", ts, 1000));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn parent_order_matters() {
        let ts = Utc::now();
        let ab = vec!["a".to_string(), "b".to_string()];
        let ba = vec!["b".to_string(), "a".to_string()];
        assert_ne!(
            compute_version_id("nb1", &ab, "c", ts, 1000),
            compute_version_id("nb1", &ba, "c", ts, 1000)
        );
    }

    #[test]
    fn history_follows_first_parent() {
        let (store, content) = fixture();
        let graph = CommitGraph::new(&store, 1000);
        let root = write(&graph, &content, &[], "root");
        let main1 = write(&graph, &content, &[&root], "main1");
        let side = write(&graph, &content, &[&root], "side");
        let merge = write(&graph, &content, &[&main1, &side], "merge");

        let history = graph.history("nb1", &merge.version_id, None).unwrap();
        let ids: Vec<_> = history.iter().map(|v| v.version_id.clone()).collect();
        assert_eq!(ids, vec![merge.version_id.clone(), main1.version_id.clone(), root.version_id.clone()]);

        let limited = graph.history("nb1", &merge.version_id, Some(2)).unwrap();
        assert_eq!(limited.len(), 2);

        let ancestors = graph.ancestors("nb1", &merge.version_id).unwrap();
        assert_eq!(ancestors.len(), 4);
        assert!(ancestors.contains(&side.version_id));
        assert!(graph.is_ancestor("nb1", &root.version_id, &side.version_id).unwrap());
        assert!(!graph.is_ancestor("nb1", &side.version_id, &main1.version_id).unwrap());
    }

    #[test]
    fn merge_base_of_diverged_branches() {
        let (store, content) = fixture();
        let graph = CommitGraph::new(&store, 1000);
        let root = write(&graph, &content, &[], "root");
        let fork = write(&graph, &content, &[&root], "fork");
        let a1 = write(&graph, &content, &[&fork], "a1");
        let a2 = write(&graph, &content, &[&a1], "a2");
        let b1 = write(&graph, &content, &[&fork], "b1");

        let cancel = CancelToken::new();
        let base = graph
            .merge_base("nb1", &a2.version_id, &b1.version_id, &cancel)
            .unwrap();
        assert_eq!(base, Some(fork.version_id.clone()));

        let base = graph
            .merge_base("nb1", &b1.version_id, &a2.version_id, &cancel)
            .unwrap();
        assert_eq!(base, Some(fork.version_id.clone()));
    }

    #[test]
    fn merge_base_when_one_side_is_ancestor() {
        let (store, content) = fixture();
        let graph = CommitGraph::new(&store, 1000);
        let root = write(&graph, &content, &[], "root");
        let tip = write(&graph, &content, &[&root], "tip");

        let cancel = CancelToken::new();
        assert_eq!(
            graph.merge_base("nb1", &tip.version_id, &root.version_id, &cancel).unwrap(),
            Some(root.version_id.clone())
        );
        assert_eq!(
            graph.merge_base("nb1", &root.version_id, &tip.version_id, &cancel).unwrap(),
            Some(root.version_id.clone())
        );
    }

    #[test]
    fn disjoint_roots_have_no_base() {
        let (store, content) = fixture();
        let graph = CommitGraph::new(&store, 1000);
        let left = write(&graph, &content, &[], "left");
        let right = write(&graph, &content, &[], "right");

        let base = graph
            .merge_base("nb1", &left.version_id, &right.version_id, &CancelToken::new())
            .unwrap();
        assert!(base.is_none());
    }

    #[test]
    fn cancelled_merge_base() {
        let (store, content) = fixture();
        let graph = CommitGraph::new(&store, 1000);
        let root = write(&graph, &content, &[], "root");
        let a = write(&graph, &content, &[&root], "a");
        let b = write(&graph, &content, &[&root], "b");

        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            graph.merge_base("nb1", &a.version_id, &b.version_id, &cancel),
            Err(crate::error::Error::Cancelled)
        ));
    }
}
