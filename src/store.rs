//! Typed, content-addressed persistence over a [`KvStore`].
//!
//! # Key Layout
//!
//! ```text
//! contents/<cid>                  ContentRecord
//! snapshots/<cid>/<checksum>      canonical snapshot JSON (deduplicated)
//! versions/<cid>/<version_id>     Version
//! branches/<cid>/<name>           Branch
//! merges/<cid>/<id>               MergeRequest
//! backups/<cid>/<id>              Backup
//! ```
//!
//! Snapshots and versions are immutable: writing an existing key again is a
//! deduplicated no-op. Branch, merge request and backup records are mutable
//! metadata.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::backup::Backup;
use crate::branch::Branch;
use crate::error::{EntityKind, Error, Result};
use crate::graph::Version;
use crate::merge::MergeRequest;
use crate::snapshot::{ContentType, Snapshot};
use crate::storage::KvStore;

/// Longest accepted content id or branch name
pub const MAX_IDENTIFIER_LEN: usize = 100;

/// Per-content metadata created by `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub content_id: String,
    pub content_type: ContentType,
    pub default_branch: String,
    pub created_at: DateTime<Utc>,
    /// Ordinary commits made so far (drives every-Nth-commit backups)
    #[serde(default)]
    pub commit_count: u64,
}

/// Content-addressed store of snapshots, versions and branch metadata.
#[derive(Clone)]
pub struct ContentStore {
    kv: Arc<dyn KvStore>,
}

impl ContentStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &dyn KvStore {
        self.kv.as_ref()
    }

    // =========================================================================
    // JSON helpers
    // =========================================================================

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key)? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|err| Error::Storage(format!("corrupt record {key}: {err}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.kv.put(key, &bytes)
    }

    fn read_all<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for key in self.kv.list(prefix)? {
            if let Some(record) = self.read_json(&key)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    // =========================================================================
    // Contents
    // =========================================================================

    pub fn get_content(&self, content_id: &str) -> Result<Option<ContentRecord>> {
        self.read_json(&content_key(content_id))
    }

    pub fn require_content(&self, content_id: &str) -> Result<ContentRecord> {
        self.get_content(content_id)?
            .ok_or_else(|| Error::not_found(EntityKind::Content, content_id))
    }

    pub fn put_content(&self, record: &ContentRecord) -> Result<()> {
        self.write_json(&content_key(&record.content_id), record)
    }

    pub fn delete_content(&self, content_id: &str) -> Result<bool> {
        self.kv.delete(&content_key(content_id))
    }

    pub fn list_contents(&self) -> Result<Vec<ContentRecord>> {
        self.read_all("contents/")
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Store a snapshot under its checksum. Returns `(checksum, size)`.
    pub fn put_snapshot(&self, content_id: &str, snapshot: &Snapshot) -> Result<(String, u64)> {
        let bytes = snapshot.canonical_bytes()?;
        let checksum = crate::snapshot::sha256_hex(&bytes);
        let key = snapshot_key(content_id, &checksum);
        if !self.kv.contains(&key)? {
            self.kv.put(&key, &bytes)?;
        }
        Ok((checksum, bytes.len() as u64))
    }

    /// Load a snapshot by checksum, verifying its integrity.
    pub fn get_snapshot(&self, content_id: &str, checksum: &str) -> Result<Snapshot> {
        let key = snapshot_key(content_id, checksum);
        let bytes = self
            .kv
            .get(&key)?
            .ok_or_else(|| Error::not_found(EntityKind::Snapshot, checksum))?;
        let actual = crate::snapshot::sha256_hex(&bytes);
        if actual != checksum {
            tracing::warn!(content_id, checksum, actual = %actual, "snapshot checksum mismatch");
            return Err(Error::Storage(format!(
                "snapshot {checksum} failed integrity check"
            )));
        }
        Snapshot::from_canonical_bytes(&bytes)
    }

    // =========================================================================
    // Versions
    // =========================================================================

    /// Persist a version. If the id already exists the stored record wins.
    pub fn put_version(&self, version: &Version) -> Result<Version> {
        let key = version_key(&version.content_id, &version.version_id);
        if let Some(existing) = self.read_json::<Version>(&key)? {
            tracing::debug!(version_id = %version.version_id, "version already stored");
            return Ok(existing);
        }
        self.write_json(&key, version)?;
        Ok(version.clone())
    }

    pub fn get_version(&self, content_id: &str, version_id: &str) -> Result<Option<Version>> {
        if validate_identifier("version id", version_id).is_err() {
            return Ok(None);
        }
        self.read_json(&version_key(content_id, version_id))
    }

    pub fn require_version(&self, content_id: &str, version_id: &str) -> Result<Version> {
        self.get_version(content_id, version_id)?
            .ok_or_else(|| Error::not_found(EntityKind::Version, version_id))
    }

    pub fn list_versions(&self, content_id: &str) -> Result<Vec<Version>> {
        self.read_all(&format!("versions/{content_id}/"))
    }

    // =========================================================================
    // Branches
    // =========================================================================

    pub fn get_branch(&self, content_id: &str, name: &str) -> Result<Option<Branch>> {
        if validate_identifier("branch name", name).is_err() {
            return Ok(None);
        }
        self.read_json(&branch_key(content_id, name))
    }

    pub fn require_branch(&self, content_id: &str, name: &str) -> Result<Branch> {
        self.get_branch(content_id, name)?
            .ok_or_else(|| Error::not_found(EntityKind::Branch, format!("{content_id}/{name}")))
    }

    pub fn put_branch(&self, branch: &Branch) -> Result<()> {
        self.write_json(&branch_key(&branch.content_id, &branch.name), branch)
    }

    pub fn delete_branch(&self, content_id: &str, name: &str) -> Result<bool> {
        self.kv.delete(&branch_key(content_id, name))
    }

    pub fn list_branches(&self, content_id: &str) -> Result<Vec<Branch>> {
        self.read_all(&format!("branches/{content_id}/"))
    }

    // =========================================================================
    // Merge requests
    // =========================================================================

    pub fn get_merge_request(&self, content_id: &str, id: &str) -> Result<Option<MergeRequest>> {
        if validate_identifier("merge request id", id).is_err() {
            return Ok(None);
        }
        self.read_json(&merge_key(content_id, id))
    }

    pub fn require_merge_request(&self, content_id: &str, id: &str) -> Result<MergeRequest> {
        self.get_merge_request(content_id, id)?
            .ok_or_else(|| Error::not_found(EntityKind::MergeRequest, id))
    }

    pub fn put_merge_request(&self, request: &MergeRequest) -> Result<()> {
        self.write_json(&merge_key(&request.content_id, &request.id), request)
    }

    pub fn delete_merge_request(&self, content_id: &str, id: &str) -> Result<bool> {
        self.kv.delete(&merge_key(content_id, id))
    }

    pub fn list_merge_requests(&self, content_id: &str) -> Result<Vec<MergeRequest>> {
        self.read_all(&format!("merges/{content_id}/"))
    }

    // =========================================================================
    // Backups
    // =========================================================================

    pub fn put_backup(&self, backup: &Backup) -> Result<()> {
        self.write_json(&backup_key(&backup.content_id, &backup.id), backup)
    }

    /// Find a backup by id alone (backup ids are globally unique).
    pub fn find_backup(&self, backup_id: &str) -> Result<Option<Backup>> {
        if validate_identifier("backup id", backup_id).is_err() {
            return Ok(None);
        }
        let suffix = format!("/{backup_id}");
        for key in self.kv.list("backups/")? {
            if key.ends_with(&suffix) {
                return self.read_json(&key);
            }
        }
        Ok(None)
    }

    pub fn delete_backup(&self, backup: &Backup) -> Result<bool> {
        self.kv.delete(&backup_key(&backup.content_id, &backup.id))
    }

    pub fn list_backups(&self, content_id: &str) -> Result<Vec<Backup>> {
        self.read_all(&format!("backups/{content_id}/"))
    }
}

// =============================================================================
// Rollback
// =============================================================================

enum Undo {
    PutContent(ContentRecord),
    PutRequest(MergeRequest),
    DeleteRequest { content_id: String, id: String },
    DeleteBranch { content_id: String, name: String },
    DeleteBackup(Backup),
}

/// Records written ahead of a branch pointer update, undone if a later write fails.
///
/// Mutations write every record first and move the branch pointer last. When
/// any of those writes fails, the steps are replayed in reverse so the
/// operation leaves nothing behind. Undo is best effort: a failing step is
/// logged and the original error is returned.
#[derive(Default)]
pub(crate) struct Rollback {
    steps: Vec<Undo>,
}

impl Rollback {
    pub fn restore_content(&mut self, previous: ContentRecord) {
        self.steps.push(Undo::PutContent(previous));
    }

    pub fn restore_request(&mut self, previous: MergeRequest) {
        self.steps.push(Undo::PutRequest(previous));
    }

    pub fn remove_request(&mut self, request: &MergeRequest) {
        self.steps.push(Undo::DeleteRequest {
            content_id: request.content_id.clone(),
            id: request.id.clone(),
        });
    }

    pub fn remove_branch(&mut self, branch: &Branch) {
        self.steps.push(Undo::DeleteBranch {
            content_id: branch.content_id.clone(),
            name: branch.name.clone(),
        });
    }

    pub fn remove_backup(&mut self, backup: Backup) {
        self.steps.push(Undo::DeleteBackup(backup));
    }

    /// Pass `result` through, undoing every recorded step if it is an error.
    pub fn finish<T>(self, store: &ContentStore, result: Result<T>) -> Result<T> {
        if let (Err(err), false) = (&result, self.steps.is_empty()) {
            tracing::warn!(error = %err, steps = self.steps.len(), "rolling back partial write");
            for step in self.steps.into_iter().rev() {
                let undone = match &step {
                    Undo::PutContent(record) => store.put_content(record),
                    Undo::PutRequest(request) => store.put_merge_request(request),
                    Undo::DeleteRequest { content_id, id } => {
                        store.delete_merge_request(content_id, id).map(drop)
                    }
                    Undo::DeleteBranch { content_id, name } => store.delete_branch(content_id, name).map(drop),
                    Undo::DeleteBackup(backup) => store.delete_backup(backup).map(drop),
                };
                if let Err(undo_err) = undone {
                    tracing::warn!(error = %undo_err, "rollback step failed");
                }
            }
        }
        result
    }
}

/// Validate a content id, branch name or record id used as a key segment.
///
/// Allowed: 1-100 chars of `[A-Za-z0-9._-]`, not starting with `.` or `-`.
pub fn validate_identifier(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidArgument(format!("{what} cannot be empty")));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::InvalidArgument(format!(
            "{what} longer than {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    if value.starts_with('.') || value.starts_with('-') {
        return Err(Error::InvalidArgument(format!(
            "{what} '{value}' cannot start with '.' or '-'"
        )));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(Error::InvalidArgument(format!(
            "{what} '{value}' contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

fn content_key(content_id: &str) -> String {
    format!("contents/{content_id}")
}

fn snapshot_key(content_id: &str, checksum: &str) -> String {
    format!("snapshots/{content_id}/{checksum}")
}

fn version_key(content_id: &str, version_id: &str) -> String {
    format!("versions/{content_id}/{version_id}")
}

fn branch_key(content_id: &str, name: &str) -> String {
    format!("branches/{content_id}/{name}")
}

fn merge_key(content_id: &str, id: &str) -> String {
    format!("merges/{content_id}/{id}")
}

fn backup_key(content_id: &str, id: &str) -> String {
    format!("backups/{content_id}/{id}")
}
