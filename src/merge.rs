//! Three-way merge and the merge request state machine.
//!
//! ```text
//! PENDING ──► MERGED
//!    │  └───► CONFLICT ──► MERGED    (resolving commit or explicit close)
//!    │            └──────► REJECTED
//!    └──────► REJECTED
//! ```
//!
//! Conflicts are a result, not an error: a conflicted merge returns a
//! request in `Conflict` status and leaves the target branch untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::backup::BackupType;
use crate::branch::Branch;
use crate::cancel::CancelToken;
use crate::diff::{apply_changes, diff_snapshots, DiffResult};
use crate::error::{Error, Result};
use crate::graph::{short_id, NewVersion, VersionId};
use crate::repo::Repository;
use crate::snapshot::Snapshot;
use crate::store::{ContentRecord, Rollback};

// =============================================================================
// Merge Request
// =============================================================================

/// Lifecycle state of a merge request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStatus {
    Pending,
    Merged,
    Conflict,
    Rejected,
}

impl MergeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStatus::Pending => "pending",
            MergeStatus::Merged => "merged",
            MergeStatus::Conflict => "conflict",
            MergeStatus::Rejected => "rejected",
        }
    }

    /// Whether the state machine allows moving from `self` to `to`.
    pub fn can_transition_to(&self, to: MergeStatus) -> bool {
        matches!(
            (self, to),
            (MergeStatus::Pending, MergeStatus::Merged)
                | (MergeStatus::Pending, MergeStatus::Conflict)
                | (MergeStatus::Pending, MergeStatus::Rejected)
                | (MergeStatus::Conflict, MergeStatus::Merged)
                | (MergeStatus::Conflict, MergeStatus::Rejected)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MergeStatus::Merged | MergeStatus::Rejected)
    }
}

impl fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(MergeStatus::Pending),
            "merged" => Ok(MergeStatus::Merged),
            "conflict" => Ok(MergeStatus::Conflict),
            "rejected" => Ok(MergeStatus::Rejected),
            _ => Err(Error::InvalidArgument(format!(
                "Invalid merge status '{}'. Expected: pending, merged, conflict, rejected",
                s
            ))),
        }
    }
}

/// A path both sides changed to different results.
///
/// Absent values (path missing on that side) are `None` and serialize as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub path: String,
    pub base_value: Option<Value>,
    pub source_value: Option<Value>,
    pub target_value: Option<Value>,
}

/// Summarize conflicts for human-readable output.
pub fn summarize_conflicts(conflicts: &[MergeConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| format!("{} ({})", conflict.path, conflict_kind_label(conflict)))
        .collect()
}

fn conflict_kind_label(conflict: &MergeConflict) -> &'static str {
    match (&conflict.base_value, &conflict.source_value, &conflict.target_value) {
        (None, _, _) => "add/add",
        (Some(_), None, _) => "delete/modify",
        (Some(_), _, None) => "modify/delete",
        _ => "content",
    }
}

/// A request to merge one branch into another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: String,
    pub content_id: String,
    pub source_branch: String,
    pub target_branch: String,
    pub status: MergeStatus,
    #[serde(default)]
    pub conflicts: Vec<MergeConflict>,
    /// Set only once the request is merged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_version_id: Option<VersionId>,
    pub author_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version_id: Option<VersionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_version_id: Option<VersionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version_id: Option<VersionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MergeRequest {
    pub fn new(
        content_id: impl Into<String>,
        source_branch: impl Into<String>,
        target_branch: impl Into<String>,
        author_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            content_id: content_id.into(),
            source_branch: source_branch.into(),
            target_branch: target_branch.into(),
            status: MergeStatus::Pending,
            conflicts: Vec::new(),
            merge_version_id: None,
            author_id: author_id.into(),
            message: message.into(),
            base_version_id: None,
            source_version_id: None,
            target_version_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, to: MergeStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                id: self.id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_merged(&mut self, version_id: impl Into<VersionId>) -> Result<()> {
        self.transition(MergeStatus::Merged)?;
        self.merge_version_id = Some(version_id.into());
        Ok(())
    }

    pub fn mark_conflict(&mut self, conflicts: Vec<MergeConflict>) -> Result<()> {
        self.transition(MergeStatus::Conflict)?;
        self.conflicts = conflicts;
        Ok(())
    }

    pub fn reject(&mut self) -> Result<()> {
        self.transition(MergeStatus::Rejected)
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

// =============================================================================
// Three-way merge
// =============================================================================

/// Result of combining two diffs against a common base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreeWayOutcome {
    /// Base with every non-conflicting change applied
    pub merged: Snapshot,
    pub conflicts: Vec<MergeConflict>,
}

impl ThreeWayOutcome {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Combine `source` and `target` (both diffs from `base`).
///
/// A path touched by one side takes that side's result. A path both sides
/// touched is applied when their results agree and reported as a conflict
/// otherwise. Neither side ever wins a disagreement.
pub fn three_way(
    base: &Snapshot,
    source: &DiffResult,
    target: &DiffResult,
    cancel: &CancelToken,
) -> Result<ThreeWayOutcome> {
    let touched: BTreeSet<&str> = source
        .paths()
        .into_iter()
        .chain(target.paths())
        .collect();

    let mut changes: BTreeMap<String, Option<Value>> = BTreeMap::new();
    let mut conflicts = Vec::new();

    for path in touched {
        cancel.check()?;
        match (source.resulting(path), target.resulting(path)) {
            (Some(result), None) | (None, Some(result)) => {
                changes.insert(path.to_string(), result.cloned());
            }
            (Some(ours), Some(theirs)) if ours == theirs => {
                changes.insert(path.to_string(), ours.cloned());
            }
            (Some(source_value), Some(target_value)) => {
                conflicts.push(MergeConflict {
                    path: path.to_string(),
                    base_value: base.get(path).cloned(),
                    source_value: source_value.cloned(),
                    target_value: target_value.cloned(),
                });
            }
            (None, None) => {}
        }
    }

    Ok(ThreeWayOutcome {
        merged: apply_changes(base, &changes)?,
        conflicts,
    })
}

/// Dry-run view of a merge between two branches.
#[derive(Debug, Clone, Serialize)]
pub struct MergePreview {
    pub base_version_id: VersionId,
    pub source_version_id: VersionId,
    pub target_version_id: VersionId,
    pub conflicts: Vec<MergeConflict>,
    /// Base plus every non-conflicting change
    pub merged: Snapshot,
}

struct Plan {
    base: VersionId,
    source: VersionId,
    target: VersionId,
    outcome: ThreeWayOutcome,
}

// =============================================================================
// Repository operations
// =============================================================================

impl Repository {
    /// Merge `source_branch` into `target_branch`.
    ///
    /// Returns the request in `Merged` or `Conflict` status. On error no
    /// request is stored and no branch moves.
    pub fn merge(
        &self,
        content_id: &str,
        source_branch: &str,
        target_branch: &str,
        author: &str,
        message: &str,
    ) -> Result<MergeRequest> {
        self.merge_with_cancel(
            content_id,
            source_branch,
            target_branch,
            author,
            message,
            &CancelToken::new(),
        )
    }

    pub fn merge_with_cancel(
        &self,
        content_id: &str,
        source_branch: &str,
        target_branch: &str,
        author: &str,
        message: &str,
        cancel: &CancelToken,
    ) -> Result<MergeRequest> {
        let _guard = self.lock(content_id)?;
        let content = self.store().require_content(content_id)?;
        let mut request = self.new_merge_request(&content, source_branch, target_branch, author, message)?;

        let mut rollback = Rollback::default();
        let outcome = self
            .execute_locked(&content, &mut request, cancel, &mut rollback)
            .and_then(|advanced| {
                rollback.remove_request(&request);
                self.persist_outcome(&request, advanced.as_ref())
            });
        rollback.finish(self.store(), outcome)?;
        Ok(request)
    }

    /// Record a pending merge request without computing it.
    pub fn open_merge_request(
        &self,
        content_id: &str,
        source_branch: &str,
        target_branch: &str,
        author: &str,
        message: &str,
    ) -> Result<MergeRequest> {
        let _guard = self.lock(content_id)?;
        let content = self.store().require_content(content_id)?;
        let request = self.new_merge_request(&content, source_branch, target_branch, author, message)?;
        self.store().put_merge_request(&request)?;
        tracing::info!(
            content_id,
            request = %request.id,
            source = source_branch,
            target = target_branch,
            "opened merge request"
        );
        Ok(request)
    }

    /// Compute a pending request. On error the stored request stays pending.
    pub fn execute_merge(&self, content_id: &str, request_id: &str, cancel: &CancelToken) -> Result<MergeRequest> {
        let _guard = self.lock(content_id)?;
        let content = self.store().require_content(content_id)?;
        let mut request = self.store().require_merge_request(content_id, request_id)?;
        if request.status != MergeStatus::Pending {
            return Err(Error::InvalidTransition {
                id: request.id,
                from: request.status.to_string(),
                to: MergeStatus::Merged.to_string(),
            });
        }

        let pending = request.clone();
        let mut rollback = Rollback::default();
        let outcome = self
            .execute_locked(&content, &mut request, cancel, &mut rollback)
            .and_then(|advanced| {
                rollback.restore_request(pending);
                self.persist_outcome(&request, advanced.as_ref())
            });
        rollback.finish(self.store(), outcome)?;
        Ok(request)
    }

    /// Compute what merging `source_branch` into `target_branch` would do.
    pub fn preview_merge(&self, content_id: &str, source_branch: &str, target_branch: &str) -> Result<MergePreview> {
        self.store().require_content(content_id)?;
        let plan = self.plan_merge(content_id, source_branch, target_branch, &CancelToken::new())?;
        Ok(MergePreview {
            base_version_id: plan.base,
            source_version_id: plan.source,
            target_version_id: plan.target,
            conflicts: plan.outcome.conflicts,
            merged: plan.outcome.merged,
        })
    }

    /// Merge base of two versions, `None` for disjoint histories.
    pub fn merge_base(&self, content_id: &str, version_a: &str, version_b: &str) -> Result<Option<VersionId>> {
        self.store().require_version(content_id, version_a)?;
        self.store().require_version(content_id, version_b)?;
        self.graph()
            .merge_base(content_id, version_a, version_b, &CancelToken::new())
    }

    pub fn get_merge_request(&self, content_id: &str, request_id: &str) -> Result<MergeRequest> {
        self.store().require_merge_request(content_id, request_id)
    }

    /// Merge requests of a content item, oldest first.
    pub fn list_merge_requests(&self, content_id: &str, status: Option<MergeStatus>) -> Result<Vec<MergeRequest>> {
        self.store().require_content(content_id)?;
        let mut requests = self.store().list_merge_requests(content_id)?;
        if let Some(status) = status {
            requests.retain(|request| request.status == status);
        }
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(requests)
    }

    /// Cancel a pending or conflicted request.
    pub fn reject_merge_request(&self, content_id: &str, request_id: &str) -> Result<MergeRequest> {
        let _guard = self.lock(content_id)?;
        let mut request = self.store().require_merge_request(content_id, request_id)?;
        request.reject()?;
        self.store().put_merge_request(&request)?;
        tracing::info!(content_id, request = request_id, "rejected merge request");
        Ok(request)
    }

    /// Mark a conflicted request merged by a resolution already on the target branch.
    pub fn close_merge_request(&self, content_id: &str, request_id: &str, version_id: &str) -> Result<MergeRequest> {
        let _guard = self.lock(content_id)?;
        let mut request = self.store().require_merge_request(content_id, request_id)?;
        if request.status != MergeStatus::Conflict {
            return Err(Error::InvalidTransition {
                id: request.id,
                from: request.status.to_string(),
                to: MergeStatus::Merged.to_string(),
            });
        }

        self.store().require_version(content_id, version_id)?;
        let target = self.store().require_branch(content_id, &request.target_branch)?;
        if !self
            .graph()
            .is_ancestor(content_id, version_id, &target.head_version_id)?
        {
            return Err(Error::InvalidArgument(format!(
                "version {} is not on branch '{}'",
                short_id(version_id),
                request.target_branch
            )));
        }

        request.mark_merged(version_id)?;
        self.store().put_merge_request(&request)?;
        tracing::info!(content_id, request = request_id, version_id, "closed merge request");
        Ok(request)
    }

    fn new_merge_request(
        &self,
        content: &ContentRecord,
        source_branch: &str,
        target_branch: &str,
        author: &str,
        message: &str,
    ) -> Result<MergeRequest> {
        self.store().require_branch(&content.content_id, source_branch)?;
        self.store().require_branch(&content.content_id, target_branch)?;
        let message = if message.trim().is_empty() {
            format!("merge {source_branch} into {target_branch}")
        } else {
            message.to_string()
        };
        Ok(MergeRequest::new(
            &content.content_id,
            source_branch,
            target_branch,
            author,
            message,
        ))
    }

    fn plan_merge(&self, content_id: &str, source_branch: &str, target_branch: &str, cancel: &CancelToken) -> Result<Plan> {
        let source = self.store().require_branch(content_id, source_branch)?.head_version_id;
        let target = self.store().require_branch(content_id, target_branch)?.head_version_id;
        let empty = || Error::EmptyMerge {
            source_branch: source_branch.to_string(),
            target_branch: target_branch.to_string(),
        };

        if source == target {
            return Err(empty());
        }

        let base = self
            .graph()
            .merge_base(content_id, &target, &source, cancel)?
            .ok_or_else(|| Error::DisjointHistory {
                source_version: source.clone(),
                target_version: target.clone(),
            })?;
        if base == source {
            return Err(empty());
        }

        let base_snapshot = self.get_version(content_id, &base)?;
        let source_diff = diff_snapshots(&base_snapshot, &self.get_version(content_id, &source)?, cancel)?;
        let target_diff = diff_snapshots(&base_snapshot, &self.get_version(content_id, &target)?, cancel)?;
        let outcome = three_way(&base_snapshot, &source_diff, &target_diff, cancel)?;

        tracing::debug!(
            content_id,
            base = short_id(&base),
            source = short_id(&source),
            target = short_id(&target),
            conflicts = outcome.conflicts.len(),
            "planned merge"
        );
        Ok(Plan {
            base,
            source,
            target,
            outcome,
        })
    }

    /// Store the finished request, then move the target branch.
    fn persist_outcome(&self, request: &MergeRequest, advanced: Option<&Branch>) -> Result<()> {
        self.store().put_merge_request(request)?;
        let Some(target) = advanced else {
            return Ok(());
        };
        self.store().put_branch(target)?;
        tracing::info!(
            content_id = %request.content_id,
            request = %request.id,
            branch = %target.name,
            version_id = %target.head_version_id,
            "merged"
        );
        Ok(())
    }

    /// Compute a request and, when clean, write the merge version.
    ///
    /// Returns the target branch advanced to the merge version; the caller
    /// stores it after the request.
    fn execute_locked(
        &self,
        content: &ContentRecord,
        request: &mut MergeRequest,
        cancel: &CancelToken,
        rollback: &mut Rollback,
    ) -> Result<Option<Branch>> {
        let content_id = content.content_id.as_str();
        let plan = self.plan_merge(content_id, &request.source_branch, &request.target_branch, cancel)?;

        request.base_version_id = Some(plan.base.clone());
        request.source_version_id = Some(plan.source.clone());
        request.target_version_id = Some(plan.target.clone());

        if !plan.outcome.is_clean() {
            tracing::warn!(
                content_id,
                request = %request.id,
                target = %request.target_branch,
                conflicts = ?summarize_conflicts(&plan.outcome.conflicts),
                "merge has conflicts"
            );
            request.mark_conflict(plan.outcome.conflicts)?;
            return Ok(None);
        }
        cancel.check()?;

        if self.options().backup_before_operations {
            let backup =
                self.create_backup_locked(content, Some(plan.target.as_str()), BackupType::Auto, Some("pre-merge"))?;
            rollback.remove_backup(backup);
        }

        let version = self.graph().write_version(
            content,
            NewVersion {
                parent_ids: vec![plan.target.clone(), plan.source.clone()],
                snapshot: &plan.outcome.merged,
                author_id: &request.author_id,
                message: &request.message,
                timestamp: Utc::now(),
            },
        )?;

        let mut target = self.store().require_branch(content_id, &request.target_branch)?;
        target.advance(&version);

        request.mark_merged(&version.version_id)?;
        Ok(Some(target))
    }
}
