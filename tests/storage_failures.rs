mod support;

use revkeep::config::RepositoryOptions;
use revkeep::trailer::with_merge_request_trailer;
use revkeep::{BackupType, CancelToken, ContentType, Error, MergeStatus, Repository};
use serde_json::json;

use support::{failing_repo, quiet_options, snap, FailingStore, AUTHOR};

fn head(repo: &Repository, branch: &str) -> String {
    repo.get_branch("nb1", branch).unwrap().head_version_id
}

/// `nb1` on main plus a `feature` branch one commit ahead.
fn with_feature(options: RepositoryOptions) -> (Repository, std::sync::Arc<FailingStore>) {
    let (repo, kv) = failing_repo(options);
    let root = repo
        .initialize("nb1", ContentType::Notebook, &snap(json!({"a": 1, "b": 1})), AUTHOR, "init")
        .unwrap();
    repo.create_branch("nb1", "feature", &root.version_id, AUTHOR).unwrap();
    repo.commit("nb1", "feature", &snap(json!({"a": 2, "b": 1})), AUTHOR, "a").unwrap();
    (repo, kv)
}

#[test]
fn commit_with_failed_periodic_backup_leaves_head() {
    let (repo, kv) = with_feature(RepositoryOptions {
        auto_backup_every: 1,
        ..quiet_options()
    });
    let before = head(&repo, "main");
    let count = repo.content("nb1").unwrap().commit_count;
    let backups = repo.list_backups("nb1").unwrap().len();

    kv.fail_puts_under("backups/");
    let next = snap(json!({"a": 1, "b": 5}));
    assert!(matches!(
        repo.commit("nb1", "main", &next, AUTHOR, "b"),
        Err(Error::Storage(_))
    ));
    assert_eq!(head(&repo, "main"), before);
    assert_eq!(repo.content("nb1").unwrap().commit_count, count);
    assert_eq!(repo.list_backups("nb1").unwrap().len(), backups);

    // The same snapshot goes through once storage recovers.
    kv.heal();
    let version = repo.commit("nb1", "main", &next, AUTHOR, "b").unwrap();
    assert_eq!(head(&repo, "main"), version.version_id);
    assert_eq!(repo.content("nb1").unwrap().commit_count, count + 1);
    assert_eq!(repo.list_backups("nb1").unwrap().len(), backups + 1);
}

#[test]
fn commit_with_failed_pointer_write_restores_counter() {
    let (repo, kv) = with_feature(quiet_options());
    let before = head(&repo, "main");
    let count = repo.content("nb1").unwrap().commit_count;

    kv.fail_puts_under("branches/");
    assert!(repo
        .commit("nb1", "main", &snap(json!({"a": 1, "b": 5})), AUTHOR, "b")
        .is_err());
    kv.heal();

    assert_eq!(head(&repo, "main"), before);
    assert_eq!(repo.content("nb1").unwrap().commit_count, count);
}

#[test]
fn resolving_commit_failure_keeps_request_conflicted() {
    let (repo, kv) = with_feature(quiet_options());
    repo.commit("nb1", "main", &snap(json!({"a": 3, "b": 1})), AUTHOR, "a on main").unwrap();
    let request = repo.merge("nb1", "feature", "main", AUTHOR, "").unwrap();
    assert_eq!(request.status, MergeStatus::Conflict);
    let before = head(&repo, "main");

    let message = with_merge_request_trailer("take feature", &request.id);
    for prefix in ["merges/", "branches/"] {
        kv.fail_puts_under(prefix);
        assert!(repo
            .commit("nb1", "main", &snap(json!({"a": 2, "b": 1})), AUTHOR, &message)
            .is_err());
        kv.heal();

        assert_eq!(head(&repo, "main"), before, "after failing {prefix}");
        assert_eq!(repo.get_merge_request("nb1", &request.id).unwrap(), request);
    }
}

#[test]
fn merge_failure_stores_no_request() {
    let (repo, kv) = with_feature(RepositoryOptions {
        auto_backup_every: 0,
        ..RepositoryOptions::default()
    });
    let before = head(&repo, "main");
    let backups = repo.list_backups("nb1").unwrap().len();

    for prefix in ["merges/", "branches/"] {
        kv.fail_puts_under(prefix);
        assert!(matches!(
            repo.merge("nb1", "feature", "main", AUTHOR, ""),
            Err(Error::Storage(_))
        ));
        kv.heal();

        assert_eq!(head(&repo, "main"), before, "after failing {prefix}");
        assert!(repo.list_merge_requests("nb1", None).unwrap().is_empty());
        assert_eq!(repo.list_backups("nb1").unwrap().len(), backups);
    }

    let merged = repo.merge("nb1", "feature", "main", AUTHOR, "").unwrap();
    assert_eq!(merged.status, MergeStatus::Merged);
    assert_eq!(head(&repo, "main"), merged.merge_version_id.unwrap());
}

#[test]
fn failed_execution_leaves_request_pending() {
    let (repo, kv) = with_feature(quiet_options());
    let opened = repo.open_merge_request("nb1", "feature", "main", AUTHOR, "").unwrap();
    let before = head(&repo, "main");

    kv.fail_puts_under("branches/");
    assert!(repo.execute_merge("nb1", &opened.id, &CancelToken::new()).is_err());
    kv.heal();

    assert_eq!(head(&repo, "main"), before);
    assert_eq!(repo.get_merge_request("nb1", &opened.id).unwrap(), opened);
    let executed = repo.execute_merge("nb1", &opened.id, &CancelToken::new()).unwrap();
    assert_eq!(executed.status, MergeStatus::Merged);
}

#[test]
fn revert_failure_leaves_head() {
    let (repo, kv) = with_feature(RepositoryOptions {
        auto_backup_every: 0,
        ..RepositoryOptions::default()
    });
    let root = head(&repo, "main");
    repo.commit("nb1", "main", &snap(json!({"a": 1, "b": 2})), AUTHOR, "b").unwrap();
    let before = head(&repo, "main");
    let backups = repo.list_backups("nb1").unwrap().len();

    for prefix in ["backups/", "branches/"] {
        kv.fail_puts_under(prefix);
        assert!(repo.revert_to_version("nb1", &root, "main", AUTHOR).is_err());
        kv.heal();

        assert_eq!(head(&repo, "main"), before, "after failing {prefix}");
        assert_eq!(repo.list_backups("nb1").unwrap().len(), backups);
    }
}

#[test]
fn restore_failure_leaves_head() {
    let (repo, kv) = with_feature(quiet_options());
    let pinned = repo.create_backup("nb1", None, BackupType::Manual).unwrap();
    repo.commit("nb1", "main", &snap(json!({"a": 1, "b": 2})), AUTHOR, "b").unwrap();
    let before = head(&repo, "main");

    kv.fail_puts_under("branches/");
    assert!(matches!(
        repo.restore_backup(&pinned.id, "main", AUTHOR),
        Err(Error::Storage(_))
    ));
    kv.heal();

    assert_eq!(head(&repo, "main"), before);
    let restored = repo.restore_backup(&pinned.id, "main", AUTHOR).unwrap();
    assert_eq!(head(&repo, "main"), restored.version_id);
}

#[test]
fn initialize_failure_can_be_retried() {
    let (repo, kv) = failing_repo(RepositoryOptions::default());
    let snapshot = snap(json!({"cell1": "a"}));

    kv.fail_puts_under("backups/");
    assert!(repo
        .initialize("nb1", ContentType::Notebook, &snapshot, AUTHOR, "init")
        .is_err());
    kv.heal();

    assert!(matches!(repo.content("nb1"), Err(Error::NotFound { .. })));
    assert!(repo.get_branch("nb1", "main").is_err());

    let root = repo
        .initialize("nb1", ContentType::Notebook, &snapshot, AUTHOR, "init")
        .unwrap();
    assert_eq!(head(&repo, "main"), root.version_id);
}
