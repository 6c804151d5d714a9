//! Repository facade.
//!
//! [`Repository`] wires the content store, the commit graph and the
//! per-content locks together. Branch, merge and backup operations are
//! implemented as `impl Repository` blocks in their own modules.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use crate::backup::BackupType;
use crate::branch::Branch;
use crate::config::{Config, RepositoryOptions};
use crate::error::{Error, Result};
use crate::graph::{CommitGraph, NewVersion, Version, VersionId};
use crate::lock::{ContentGuard, ContentLocks};
use crate::merge::{MergeRequest, MergeStatus};
use crate::snapshot::{ContentType, Snapshot};
use crate::storage::{FsStore, KvStore, MemoryStore};
use crate::store::{validate_identifier, ContentRecord, ContentStore, Rollback};
use crate::trailer;

/// Versioned content over one key/value store.
pub struct Repository {
    store: ContentStore,
    locks: ContentLocks,
    options: RepositoryOptions,
}

impl Repository {
    pub fn new(kv: Arc<dyn KvStore>, options: RepositoryOptions) -> Self {
        Self {
            store: ContentStore::new(kv),
            locks: ContentLocks::new(options.lock_timeout),
            options,
        }
    }

    /// Repository over a fresh [`MemoryStore`] with default options.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), RepositoryOptions::default())
    }

    /// Open a filesystem store at `root`, reading `revkeep.toml` if present.
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with_store(root).map(|(repo, _)| repo)
    }

    /// Same as [`Repository::open`], also returning the store for its lock files.
    pub fn open_with_store(root: &Path) -> Result<(Self, FsStore)> {
        let options = Config::load_from_root(root).repository_options()?;
        let kv = FsStore::open(root)?;
        tracing::debug!(root = %root.display(), "opened store");
        Ok((Self::new(Arc::new(kv.clone()), options), kv))
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub(crate) fn graph(&self) -> CommitGraph<'_> {
        CommitGraph::new(&self.store, self.options.timestamp_bucket_ms)
    }

    /// Serialize mutations of one content item.
    pub(crate) fn lock(&self, content_id: &str) -> Result<ContentGuard> {
        self.locks.acquire(content_id)
    }

    // =========================================================================
    // Content lifecycle
    // =========================================================================

    /// Create the root version and the default branch.
    pub fn initialize(
        &self,
        content_id: &str,
        content_type: ContentType,
        snapshot: &Snapshot,
        author: &str,
        message: &str,
    ) -> Result<Version> {
        validate_identifier("content id", content_id)?;
        validate_author(author)?;
        let _guard = self.lock(content_id)?;

        if self.store.get_content(content_id)?.is_some() {
            return Err(Error::DuplicateContent(content_id.to_string()));
        }

        let content = ContentRecord {
            content_id: content_id.to_string(),
            content_type,
            default_branch: self.options.default_branch.clone(),
            created_at: Utc::now(),
            commit_count: 0,
        };
        let root = self.graph().write_version(
            &content,
            NewVersion {
                parent_ids: Vec::new(),
                snapshot,
                author_id: author,
                message,
                timestamp: Utc::now(),
            },
        )?;
        let mut rollback = Rollback::default();
        let written = self.write_initial_records(&content, &root, &mut rollback);
        rollback.finish(&self.store, written)?;

        tracing::info!(
            content_id,
            %content_type,
            version_id = %root.version_id,
            "initialized content"
        );
        Ok(root)
    }

    fn write_initial_records(&self, content: &ContentRecord, root: &Version, rollback: &mut Rollback) -> Result<()> {
        if self.options.backup_on_initialize {
            let backup =
                self.create_backup_locked(content, Some(root.version_id.as_str()), BackupType::Auto, Some("initialize"))?;
            rollback.remove_backup(backup);
        }
        let branch = Branch::new(&content.content_id, &content.default_branch, &root.version_id);
        rollback.remove_branch(&branch);
        self.store.put_branch(&branch)?;
        // The content record marks the item initialized, so it goes last.
        self.store.put_content(content)
    }

    /// Commit a full snapshot on top of `branch`.
    ///
    /// A `Merge-Request: <id>` trailer naming a conflicted request that
    /// targets `branch` makes this commit its resolution: the version gets
    /// the request's source head as second parent and the request is
    /// marked merged.
    pub fn commit(
        &self,
        content_id: &str,
        branch: &str,
        snapshot: &Snapshot,
        author: &str,
        message: &str,
    ) -> Result<Version> {
        validate_author(author)?;
        let _guard = self.lock(content_id)?;
        let content = self.store.require_content(content_id)?;
        let head_branch = self.store.require_branch(content_id, branch)?;
        let head = self.store.require_version(content_id, &head_branch.head_version_id)?;

        if snapshot.checksum()? == head.checksum {
            return Err(Error::NoChanges {
                content_id: content_id.to_string(),
                branch: branch.to_string(),
            });
        }

        let resolving = self.resolving_request(content_id, branch, message)?;
        let mut parent_ids = vec![head.version_id.clone()];
        if let Some(source) = resolving.as_ref().and_then(|r| r.source_version_id.clone()) {
            if source != head.version_id {
                parent_ids.push(source);
            }
        }

        let version = self.graph().write_version(
            &content,
            NewVersion {
                parent_ids,
                snapshot,
                author_id: author,
                message,
                timestamp: Utc::now(),
            },
        )?;
        let mut rollback = Rollback::default();
        let written = self.write_commit_records(content, head_branch, &version, resolving, &mut rollback);
        rollback.finish(&self.store, written)?;

        tracing::info!(
            content_id,
            branch,
            version_id = %version.version_id,
            size = version.size,
            "committed"
        );
        Ok(version)
    }

    /// Counter, periodic backup and resolved request first; the branch head last.
    fn write_commit_records(
        &self,
        mut content: ContentRecord,
        mut branch: Branch,
        version: &Version,
        resolving: Option<MergeRequest>,
        rollback: &mut Rollback,
    ) -> Result<()> {
        rollback.restore_content(content.clone());
        content.commit_count += 1;
        self.store.put_content(&content)?;

        let every = u64::from(self.options.auto_backup_every);
        if every > 0 && content.commit_count % every == 0 {
            let backup =
                self.create_backup_locked(&content, Some(version.version_id.as_str()), BackupType::Auto, Some("periodic"))?;
            rollback.remove_backup(backup);
        }

        if let Some(mut request) = resolving {
            rollback.restore_request(request.clone());
            request.mark_merged(&version.version_id)?;
            self.store.put_merge_request(&request)?;
            tracing::info!(
                content_id = %content.content_id,
                request = %request.id,
                version_id = %version.version_id,
                "resolved merge request"
            );
        }

        branch.advance(version);
        self.store.put_branch(&branch)
    }

    fn resolving_request(&self, content_id: &str, branch: &str, message: &str) -> Result<Option<MergeRequest>> {
        let Some(request_id) = trailer::find_merge_request_id(message) else {
            return Ok(None);
        };
        match self.store.get_merge_request(content_id, &request_id)? {
            Some(request)
                if request.status == MergeStatus::Conflict && request.target_branch == branch =>
            {
                Ok(Some(request))
            }
            Some(request) => {
                tracing::warn!(
                    content_id,
                    branch,
                    request = %request_id,
                    status = %request.status,
                    target = %request.target_branch,
                    "merge request trailer does not name a conflict on this branch"
                );
                Ok(None)
            }
            None => {
                tracing::warn!(content_id, request = %request_id, "merge request trailer names unknown request");
                Ok(None)
            }
        }
    }

    /// Versions from the head of `branch` to the root, following first parents.
    pub fn get_history(&self, content_id: &str, branch: &str) -> Result<Vec<Version>> {
        self.get_history_limited(content_id, branch, None)
    }

    pub fn get_history_limited(&self, content_id: &str, branch: &str, limit: Option<usize>) -> Result<Vec<Version>> {
        let branch = self.store.require_branch(content_id, branch)?;
        self.graph()
            .history(content_id, &branch.head_version_id, limit)
    }

    /// Snapshot of a version.
    pub fn get_version(&self, content_id: &str, version_id: &str) -> Result<Snapshot> {
        let version = self.store.require_version(content_id, version_id)?;
        self.graph().snapshot_of(&version)
    }

    pub fn get_version_record(&self, content_id: &str, version_id: &str) -> Result<Version> {
        self.store.require_version(content_id, version_id)
    }

    /// Full ancestry of a version through every parent, itself included.
    pub fn ancestors(&self, content_id: &str, version_id: &str) -> Result<BTreeSet<VersionId>> {
        self.store.require_version(content_id, version_id)?;
        self.graph().ancestors(content_id, version_id)
    }

    pub fn content(&self, content_id: &str) -> Result<ContentRecord> {
        self.store.require_content(content_id)
    }

    pub fn list_contents(&self) -> Result<Vec<ContentRecord>> {
        self.store.list_contents()
    }

    /// Drop branch, merge request and backup metadata of a content item.
    ///
    /// Versions and snapshots are kept.
    pub fn remove_content(&self, content_id: &str) -> Result<ContentRecord> {
        let _guard = self.lock(content_id)?;
        let content = self.store.require_content(content_id)?;

        // Content record first, so a partial removal reads as uninitialized.
        self.store.delete_content(content_id)?;
        for branch in self.store.list_branches(content_id)? {
            self.store.delete_branch(content_id, &branch.name)?;
        }
        for request in self.store.list_merge_requests(content_id)? {
            self.store.delete_merge_request(content_id, &request.id)?;
        }
        for backup in self.store.list_backups(content_id)? {
            self.store.delete_backup(&backup)?;
        }

        tracing::info!(content_id, "removed content");
        Ok(content)
    }
}

fn validate_author(author: &str) -> Result<()> {
    if author.trim().is_empty() {
        return Err(Error::InvalidArgument("author cannot be empty".to_string()));
    }
    Ok(())
}
