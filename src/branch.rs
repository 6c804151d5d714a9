//! Branches: named, mutable heads per content item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::Version;
use crate::merge::MergeStatus;
use crate::repo::Repository;
use crate::store::validate_identifier;

/// A named reference to a head version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub content_id: String,
    pub head_version_id: String,
    /// Version the branch was created at
    pub created_from_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Branch {
    pub(crate) fn new(content_id: &str, name: &str, version_id: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            content_id: content_id.to_string(),
            head_version_id: version_id.to_string(),
            created_from_version: version_id.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Point the branch at `version`.
    pub(crate) fn advance(&mut self, version: &Version) {
        self.head_version_id = version.version_id.clone();
        self.updated_at = Utc::now();
    }
}

/// Check a branch name: 1-100 chars of `[A-Za-z0-9._-]`, not starting with `.` or `-`.
pub fn validate_branch_name(name: &str) -> Result<()> {
    validate_identifier("branch name", name).map_err(|err| match err {
        Error::InvalidArgument(msg) => Error::Validation(msg),
        other => other,
    })
}

impl Repository {
    /// Create a branch at an existing version.
    pub fn create_branch(
        &self,
        content_id: &str,
        name: &str,
        from_version: &str,
        author: &str,
    ) -> Result<Branch> {
        validate_branch_name(name)?;
        let _guard = self.lock(content_id)?;
        self.store().require_content(content_id)?;

        if self.store().get_branch(content_id, name)?.is_some() {
            return Err(Error::DuplicateBranch {
                content_id: content_id.to_string(),
                name: name.to_string(),
            });
        }
        let version = self.store().require_version(content_id, from_version)?;

        let branch = Branch::new(content_id, name, &version.version_id);
        self.store().put_branch(&branch)?;

        tracing::info!(
            content_id,
            branch = name,
            version_id = %version.version_id,
            author,
            "created branch"
        );
        Ok(branch)
    }

    /// Delete a branch.
    ///
    /// Refused while a pending merge request targets the branch, and for the
    /// last branch of a content item. Versions are never deleted.
    pub fn delete_branch(&self, content_id: &str, name: &str) -> Result<Branch> {
        let _guard = self.lock(content_id)?;
        let branch = self.store().require_branch(content_id, name)?;

        let pending = self
            .store()
            .list_merge_requests(content_id)?
            .into_iter()
            .find(|request| request.status == MergeStatus::Pending && request.target_branch == name);
        if let Some(request) = pending {
            tracing::warn!(content_id, branch = name, request = %request.id, "refused to delete branch");
            return Err(Error::BranchInUse {
                name: name.to_string(),
                reason: format!("pending merge request {} targets it", request.id),
            });
        }

        if self.store().list_branches(content_id)?.len() <= 1 {
            tracing::warn!(content_id, branch = name, "refused to delete last branch");
            return Err(Error::BranchInUse {
                name: name.to_string(),
                reason: "it is the last branch of the content".to_string(),
            });
        }

        self.store().delete_branch(content_id, name)?;
        tracing::info!(content_id, branch = name, "deleted branch");
        Ok(branch)
    }

    /// List branches sorted by name, optionally filtered by a glob pattern.
    pub fn list_branches(&self, content_id: &str, pattern: Option<&str>) -> Result<Vec<Branch>> {
        self.store().require_content(content_id)?;

        let matcher = match pattern {
            Some(pattern) => Some(glob::Pattern::new(pattern).map_err(|err| {
                Error::InvalidArgument(format!("invalid branch pattern '{pattern}': {err}"))
            })?),
            None => None,
        };

        let mut branches = self.store().list_branches(content_id)?;
        if let Some(glob) = &matcher {
            branches.retain(|branch| glob.matches(&branch.name));
        }
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(branches)
    }

    pub fn get_branch(&self, content_id: &str, name: &str) -> Result<Branch> {
        self.store().require_branch(content_id, name)
    }
}
