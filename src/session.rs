//! Caller sessions with an advisory active branch per content item.

use std::collections::HashMap;

use crate::branch::Branch;
use crate::error::Result;
use crate::graph::Version;
use crate::repo::Repository;
use crate::snapshot::Snapshot;

/// One caller's view of a repository.
///
/// The active branch is local to the session: switching it never touches
/// stored data, and other sessions keep their own.
pub struct Session<'r> {
    repo: &'r Repository,
    author: String,
    active: HashMap<String, String>,
}

impl Repository {
    pub fn session(&self, author: impl Into<String>) -> Session<'_> {
        Session {
            repo: self,
            author: author.into(),
            active: HashMap::new(),
        }
    }
}

impl<'r> Session<'r> {
    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn repository(&self) -> &'r Repository {
        self.repo
    }

    /// Active branch for a content item; the content's default branch until switched.
    pub fn active_branch(&self, content_id: &str) -> Result<String> {
        if let Some(name) = self.active.get(content_id) {
            return Ok(name.clone());
        }
        Ok(self.repo.content(content_id)?.default_branch)
    }

    pub fn switch_active_branch(&mut self, content_id: &str, name: &str) -> Result<Branch> {
        let branch = self.repo.get_branch(content_id, name)?;
        self.active.insert(content_id.to_string(), name.to_string());
        tracing::debug!(content_id, branch = name, author = %self.author, "switched active branch");
        Ok(branch)
    }

    pub fn commit(&self, content_id: &str, snapshot: &Snapshot, message: &str) -> Result<Version> {
        let branch = self.active_branch(content_id)?;
        self.repo.commit(content_id, &branch, snapshot, &self.author, message)
    }

    pub fn history(&self, content_id: &str) -> Result<Vec<Version>> {
        let branch = self.active_branch(content_id)?;
        self.repo.get_history(content_id, &branch)
    }

    /// Restore a backup onto the active branch of its content item.
    pub fn restore_backup(&self, backup_id: &str) -> Result<Version> {
        let backup = self.repo.get_backup(backup_id)?;
        let branch = self.active_branch(&backup.content_id)?;
        self.repo.restore_backup(backup_id, &branch, &self.author)
    }

    pub fn revert_to_version(&self, content_id: &str, version_id: &str) -> Result<Version> {
        let branch = self.active_branch(content_id)?;
        self.repo
            .revert_to_version(content_id, version_id, &branch, &self.author)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::snapshot::ContentType;
    use serde_json::json;

    #[test]
    fn active_branch_is_per_session() {
        let repo = Repository::in_memory();
        let root = repo
            .initialize(
                "viz1",
                ContentType::Visualization,
                &Snapshot::from_json(json!({"layer": "base"})).unwrap(),
                "u1",
                "init",
            )
            .unwrap();
        repo.create_branch("viz1", "draft", &root.version_id, "u1").unwrap();

        let mut alice = repo.session("alice");
        let bob = repo.session("bob");
        assert_eq!(alice.active_branch("viz1").unwrap(), "main");
        alice.switch_active_branch("viz1", "draft").unwrap();
        assert!(matches!(
            alice.switch_active_branch("viz1", "nope"),
            Err(Error::NotFound { .. })
        ));
        assert_eq!(alice.active_branch("viz1").unwrap(), "draft");
        assert_eq!(bob.active_branch("viz1").unwrap(), "main");

        let version = alice
            .commit("viz1", &Snapshot::from_json(json!({"layer": "roads"})).unwrap(), "roads")
            .unwrap();
        assert_eq!(version.author_id, "alice");
        assert_eq!(repo.get_branch("viz1", "draft").unwrap().head_version_id, version.version_id);
        assert_eq!(repo.get_branch("viz1", "main").unwrap().head_version_id, root.version_id);
        assert_eq!(alice.history("viz1").unwrap().len(), 2);
        assert_eq!(bob.history("viz1").unwrap().len(), 1);

        let reverted = alice.revert_to_version("viz1", &root.version_id).unwrap();
        assert_eq!(reverted.parent_ids, vec![version.version_id]);
    }
}
