//! Backups, retention and additive restore/revert.
//!
//! A backup pins a version id. Restoring it, or reverting to any version,
//! writes a new version on top of the branch head: history only grows.
//!
//! Retention:
//! - auto backups expire at `created_at + ttl` and are swept by the next
//!   `create_backup` on the same content; an expired backup is treated as
//!   gone even before the sweep deletes it
//! - manual backups never expire; the oldest beyond the configured count are
//!   removed only by an explicit `prune_manual_backups`

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EntityKind, Error, Result};
use crate::graph::{short_id, NewVersion, Version};
use crate::repo::Repository;
use crate::snapshot::Snapshot;
use crate::store::{ContentRecord, Rollback};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Auto,
    Manual,
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupType::Auto => write!(f, "auto"),
            BackupType::Manual => write!(f, "manual"),
        }
    }
}

impl FromStr for BackupType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(BackupType::Auto),
            "manual" => Ok(BackupType::Manual),
            _ => Err(Error::InvalidArgument(format!(
                "Invalid backup type '{}'. Expected: auto, manual",
                s
            ))),
        }
    }
}

/// A retained pointer to a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub id: String,
    pub content_id: String,
    pub version_id: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub created_at: DateTime<Utc>,
    /// `None` for manual backups
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Backup {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

fn newest_first(backups: &mut [Backup]) {
    backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

impl Repository {
    /// Back up `version_id`, or the head of the default branch when omitted.
    pub fn create_backup(&self, content_id: &str, version_id: Option<&str>, backup_type: BackupType) -> Result<Backup> {
        self.create_backup_with_reason(content_id, version_id, backup_type, None)
    }

    pub fn create_backup_with_reason(
        &self,
        content_id: &str,
        version_id: Option<&str>,
        backup_type: BackupType,
        reason: Option<&str>,
    ) -> Result<Backup> {
        let _guard = self.lock(content_id)?;
        let content = self.store().require_content(content_id)?;
        self.create_backup_locked(&content, version_id, backup_type, reason)
    }

    /// Sweep expired auto backups, then write a new backup. Caller holds the content lock.
    pub(crate) fn create_backup_locked(
        &self,
        content: &ContentRecord,
        version_id: Option<&str>,
        backup_type: BackupType,
        reason: Option<&str>,
    ) -> Result<Backup> {
        let content_id = content.content_id.as_str();
        let now = Utc::now();
        self.sweep_expired(content_id, now)?;

        let version_id = match version_id {
            Some(version_id) => self.store().require_version(content_id, version_id)?.version_id,
            None => {
                self.store()
                    .require_branch(content_id, &content.default_branch)?
                    .head_version_id
            }
        };

        let expires_at = match backup_type {
            BackupType::Auto => Some(now + self.options().auto_backup_ttl),
            BackupType::Manual => None,
        };
        let backup = Backup {
            id: Uuid::new_v4().to_string(),
            content_id: content_id.to_string(),
            version_id,
            backup_type,
            created_at: now,
            expires_at,
            reason: reason.map(str::to_string),
        };
        self.store().put_backup(&backup)?;

        tracing::info!(
            content_id,
            backup = %backup.id,
            version_id = %backup.version_id,
            kind = %backup_type,
            reason = reason.unwrap_or(""),
            "created backup"
        );
        Ok(backup)
    }

    /// Delete expired auto backups of a content item.
    pub fn purge_expired_backups(&self, content_id: &str) -> Result<Vec<Backup>> {
        self.purge_expired_backups_at(content_id, Utc::now())
    }

    /// Same as [`Repository::purge_expired_backups`] with an explicit clock.
    pub fn purge_expired_backups_at(&self, content_id: &str, now: DateTime<Utc>) -> Result<Vec<Backup>> {
        let _guard = self.lock(content_id)?;
        self.store().require_content(content_id)?;
        self.sweep_expired(content_id, now)
    }

    fn sweep_expired(&self, content_id: &str, now: DateTime<Utc>) -> Result<Vec<Backup>> {
        let mut removed = Vec::new();
        for backup in self.store().list_backups(content_id)? {
            if backup.is_expired_at(now) {
                self.store().delete_backup(&backup)?;
                removed.push(backup);
            }
        }
        if !removed.is_empty() {
            tracing::debug!(content_id, removed = removed.len(), "swept expired backups");
        }
        Ok(removed)
    }

    /// Remove manual backups beyond the newest `max_manual_backups`.
    pub fn prune_manual_backups(&self, content_id: &str) -> Result<Vec<Backup>> {
        let _guard = self.lock(content_id)?;
        self.store().require_content(content_id)?;

        let mut manual: Vec<Backup> = self
            .store()
            .list_backups(content_id)?
            .into_iter()
            .filter(|backup| backup.backup_type == BackupType::Manual)
            .collect();
        newest_first(&mut manual);

        let keep = self.options().max_manual_backups;
        let pruned = if manual.len() > keep {
            manual.split_off(keep)
        } else {
            Vec::new()
        };
        for backup in &pruned {
            self.store().delete_backup(backup)?;
        }

        tracing::info!(content_id, pruned = pruned.len(), keep, "pruned manual backups");
        Ok(pruned)
    }

    /// Live backups of a content item, newest first.
    pub fn list_backups(&self, content_id: &str) -> Result<Vec<Backup>> {
        self.store().require_content(content_id)?;
        let now = Utc::now();
        let mut backups: Vec<Backup> = self
            .store()
            .list_backups(content_id)?
            .into_iter()
            .filter(|backup| !backup.is_expired_at(now))
            .collect();
        newest_first(&mut backups);
        Ok(backups)
    }

    /// Look up a live backup by id.
    pub fn get_backup(&self, backup_id: &str) -> Result<Backup> {
        match self.store().find_backup(backup_id)? {
            Some(backup) if !backup.is_expired() => Ok(backup),
            _ => Err(Error::not_found(EntityKind::Backup, backup_id)),
        }
    }

    pub fn delete_backup(&self, backup_id: &str) -> Result<Backup> {
        let backup = self
            .store()
            .find_backup(backup_id)?
            .ok_or_else(|| Error::not_found(EntityKind::Backup, backup_id))?;
        let _guard = self.lock(&backup.content_id)?;
        self.store().delete_backup(&backup)?;
        tracing::info!(content_id = %backup.content_id, backup = backup_id, "deleted backup");
        Ok(backup)
    }

    /// Write a new version on `branch` whose snapshot equals the backup's.
    pub fn restore_backup(&self, backup_id: &str, branch: &str, author: &str) -> Result<Version> {
        let backup = self.get_backup(backup_id)?;
        let _guard = self.lock(&backup.content_id)?;
        let content = self.store().require_content(&backup.content_id)?;
        // Re-check under the lock: a concurrent sweep or delete may have won.
        let backup = self.get_backup(backup_id)?;
        let target = self.store().require_version(&content.content_id, &backup.version_id)?;

        let message = format!(
            "restore backup {} (version {})",
            backup.id,
            short_id(&target.version_id)
        );
        self.write_restoring_version(&content, branch, &target, author, &message, "pre-restore")
    }

    /// Write a new version on `branch` whose snapshot equals `version_id`'s.
    pub fn revert_to_version(&self, content_id: &str, version_id: &str, branch: &str, author: &str) -> Result<Version> {
        let _guard = self.lock(content_id)?;
        let content = self.store().require_content(content_id)?;
        let target = self.store().require_version(content_id, version_id)?;

        let message = format!("revert to {}", short_id(&target.version_id));
        self.write_restoring_version(&content, branch, &target, author, &message, "pre-revert")
    }

    fn write_restoring_version(
        &self,
        content: &ContentRecord,
        branch_name: &str,
        target: &Version,
        author: &str,
        message: &str,
        backup_reason: &str,
    ) -> Result<Version> {
        let content_id = content.content_id.as_str();
        let mut branch = self.store().require_branch(content_id, branch_name)?;
        let head = self.store().require_version(content_id, &branch.head_version_id)?;
        if head.checksum == target.checksum {
            return Err(Error::NoChanges {
                content_id: content_id.to_string(),
                branch: branch_name.to_string(),
            });
        }

        let snapshot = self.graph().snapshot_of(target)?;
        let mut rollback = Rollback::default();
        let written = self
            .write_on_head(content, &head, &snapshot, author, message, backup_reason, &mut rollback)
            .and_then(|version| {
                branch.advance(&version);
                self.store().put_branch(&branch).map(|()| version)
            });
        let version = rollback.finish(self.store(), written)?;

        tracing::info!(
            content_id,
            branch = branch_name,
            version_id = %version.version_id,
            restored = %target.version_id,
            "wrote restoring version"
        );
        Ok(version)
    }
}

impl Repository {
    /// Pre-operation backup of `head`, then the new version on top of it.
    #[allow(clippy::too_many_arguments)]
    fn write_on_head(
        &self,
        content: &ContentRecord,
        head: &Version,
        snapshot: &Snapshot,
        author: &str,
        message: &str,
        backup_reason: &str,
        rollback: &mut Rollback,
    ) -> Result<Version> {
        if self.options().backup_before_operations {
            let backup =
                self.create_backup_locked(content, Some(head.version_id.as_str()), BackupType::Auto, Some(backup_reason))?;
            rollback.remove_backup(backup);
        }

        self.graph().write_version(
            content,
            NewVersion {
                parent_ids: vec![head.version_id.clone()],
                snapshot,
                author_id: author,
                message,
                timestamp: Utc::now(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryOptions;
    use crate::snapshot::{ContentType, Snapshot};
    use crate::storage::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn repo(options: RepositoryOptions) -> Repository {
        let repo = Repository::new(Arc::new(MemoryStore::new()), options);
        repo.initialize(
            "nb1",
            ContentType::Notebook,
            &Snapshot::from_json(json!({"cell1": "a"})).unwrap(),
            "u1",
            "init",
        )
        .unwrap();
        repo
    }

    #[test]
    fn initialize_takes_auto_backup() {
        let repo = repo(RepositoryOptions::default());
        let backups = repo.list_backups("nb1").unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].backup_type, BackupType::Auto);
        assert_eq!(backups[0].reason.as_deref(), Some("initialize"));
        assert!(backups[0].expires_at.is_some());
    }

    #[test]
    fn manual_backup_defaults_to_default_branch_head() {
        let repo = repo(RepositoryOptions::default());
        let head = repo.get_branch("nb1", "main").unwrap().head_version_id;
        let backup = repo.create_backup("nb1", None, BackupType::Manual).unwrap();
        assert_eq!(backup.version_id, head);
        assert!(backup.expires_at.is_none());
        assert_eq!(repo.get_backup(&backup.id).unwrap(), backup);

        let serialized = serde_json::to_value(&backup).unwrap();
        assert_eq!(serialized["type"], json!("manual"));
        assert_eq!(serialized["expires_at"], serde_json::Value::Null);
    }

    #[test]
    fn expired_auto_backups_are_swept() {
        let options = RepositoryOptions {
            auto_backup_ttl: chrono::Duration::zero(),
            ..RepositoryOptions::default()
        };
        let repo = repo(options);
        let stale = repo.create_backup("nb1", None, BackupType::Auto).unwrap();
        assert!(matches!(
            repo.get_backup(&stale.id),
            Err(Error::NotFound { kind: EntityKind::Backup, .. })
        ));

        repo.create_backup("nb1", None, BackupType::Manual).unwrap();
        assert!(repo.store().find_backup(&stale.id).unwrap().is_none());
    }

    #[test]
    fn purge_with_clock() {
        let repo = repo(RepositoryOptions::default());
        let later = Utc::now() + chrono::Duration::days(8);
        let removed = repo.purge_expired_backups_at("nb1", later).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(repo.list_backups("nb1").unwrap().is_empty());
    }

    #[test]
    fn prune_keeps_newest_manual() {
        let options = RepositoryOptions {
            max_manual_backups: 2,
            ..RepositoryOptions::default()
        };
        let repo = repo(options);
        let first = repo.create_backup("nb1", None, BackupType::Manual).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        repo.create_backup("nb1", None, BackupType::Manual).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        repo.create_backup("nb1", None, BackupType::Manual).unwrap();

        // Not pruned until asked.
        let manual = |repo: &Repository| {
            repo.list_backups("nb1")
                .unwrap()
                .into_iter()
                .filter(|b| b.backup_type == BackupType::Manual)
                .count()
        };
        assert_eq!(manual(&repo), 3);

        let pruned = repo.prune_manual_backups("nb1").unwrap();
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].id, first.id);
        assert_eq!(manual(&repo), 2);
    }

    #[test]
    fn revert_is_additive() {
        let repo = repo(RepositoryOptions::default());
        let root = repo.get_branch("nb1", "main").unwrap().head_version_id;
        let v1 = repo
            .commit(
                "nb1",
                "main",
                &Snapshot::from_json(json!({"cell1": "b"})).unwrap(),
                "u1",
                "edit",
            )
            .unwrap();

        let reverted = repo.revert_to_version("nb1", &root, "main", "u1").unwrap();
        assert_eq!(reverted.parent_ids, vec![v1.version_id.clone()]);
        assert!(reverted.message.starts_with("revert to "));
        assert_eq!(
            repo.get_version("nb1", &reverted.version_id).unwrap(),
            repo.get_version("nb1", &root).unwrap()
        );
        assert!(matches!(
            repo.revert_to_version("nb1", &root, "main", "u1"),
            Err(Error::NoChanges { .. })
        ));
    }

    #[test]
    fn restore_backup_writes_new_head() {
        let repo = repo(RepositoryOptions::default());
        let backup = repo.create_backup("nb1", None, BackupType::Manual).unwrap();
        repo.commit(
            "nb1",
            "main",
            &Snapshot::from_json(json!({"cell1": "z"})).unwrap(),
            "u1",
            "edit",
        )
        .unwrap();

        let restored = repo.restore_backup(&backup.id, "main", "u2").unwrap();
        assert_eq!(restored.author_id, "u2");
        assert!(restored.message.contains(&backup.id));
        assert_eq!(repo.get_history("nb1", "main").unwrap().len(), 3);
        assert_eq!(
            repo.get_version("nb1", &restored.version_id).unwrap(),
            Snapshot::from_json(json!({"cell1": "a"})).unwrap()
        );
    }
}
