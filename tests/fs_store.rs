mod support;

use std::fs;
use std::time::Duration;

use revkeep::config::CONFIG_FILENAME;
use revkeep::{BackupType, ContentType, Error, FsStore, KvStore, MergeStatus, Repository};
use serde_json::json;

use support::{snap, AUTHOR};

#[test]
fn history_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let (root, head, request_id) = {
        let repo = Repository::open(dir.path())?;
        let root = repo.initialize("nb1", ContentType::Notebook, &snap(json!({"cell1": "a"})), AUTHOR, "init")?;
        repo.create_branch("nb1", "feature", &root.version_id, AUTHOR)?;
        repo.commit("nb1", "feature", &snap(json!({"cell1": "a2"})), AUTHOR, "edit")?;
        let request = repo.merge("nb1", "feature", "main", AUTHOR, "")?;
        let head = repo.get_branch("nb1", "main")?.head_version_id;
        (root, head, request.id)
    };

    let repo = Repository::open(dir.path())?;
    let history = repo.get_history("nb1", "main")?;
    assert_eq!(history.first().map(|v| v.version_id.as_str()), Some(head.as_str()));
    assert_eq!(history.last().map(|v| v.version_id.as_str()), Some(root.version_id.as_str()));
    assert_eq!(repo.get_version("nb1", &head)?, snap(json!({"cell1": "a2"})));
    assert_eq!(repo.get_merge_request("nb1", &request_id)?.status, MergeStatus::Merged);
    assert_eq!(repo.list_branches("nb1", None)?.len(), 2);
    assert_eq!(repo.list_contents()?.len(), 1);
    Ok(())
}

#[test]
fn layout_matches_key_space() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let repo = Repository::open(dir.path())?;
    let root = repo.initialize("ds1", ContentType::Dataset, &snap(json!({"rows": 1})), AUTHOR, "init")?;

    let data = dir.path().join("data");
    assert!(data.join("contents").join("ds1").is_file());
    assert!(data.join("versions").join("ds1").join(&root.version_id).is_file());
    assert!(data.join("branches").join("ds1").join("main").is_file());
    assert!(data.join("snapshots").join("ds1").join(&root.checksum).is_file());
    assert_eq!(fs::read_dir(data.join("backups").join("ds1"))?.count(), 1);
    Ok(())
}

#[test]
fn tampered_snapshot_is_detected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let repo = Repository::open(dir.path())?;
    let root = repo.initialize("ds1", ContentType::Dataset, &snap(json!({"rows": 1})), AUTHOR, "init")?;

    let path = dir
        .path()
        .join("data")
        .join("snapshots")
        .join("ds1")
        .join(&root.checksum);
    fs::write(path, br#"{"rows":2}"#)?;

    assert!(matches!(
        repo.get_version("ds1", &root.version_id),
        Err(Error::Storage(_))
    ));
    Ok(())
}

#[test]
fn config_file_drives_options() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join(CONFIG_FILENAME),
        "default_branch = \"trunk\"\n\n[backup]\non_initialize = false\n",
    )?;

    let repo = Repository::open(dir.path())?;
    repo.initialize("sc1", ContentType::Script, &snap(json!({"body": "x"})), AUTHOR, "init")?;
    assert_eq!(repo.content("sc1")?.default_branch, "trunk");
    assert!(repo.get_branch("sc1", "trunk").is_ok());
    assert!(repo.list_backups("sc1")?.is_empty());

    let manual = repo.create_backup("sc1", None, BackupType::Manual)?;
    assert!(Repository::open(dir.path())?.get_backup(&manual.id).is_ok());
    Ok(())
}

#[test]
fn open_with_store_shares_config_and_root() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join(CONFIG_FILENAME),
        "default_branch = \"trunk\"\n\n[locking]\ntimeout_ms = 250\n",
    )?;

    let (repo, store) = Repository::open_with_store(dir.path())?;
    assert_eq!(repo.options().default_branch, "trunk");
    assert_eq!(repo.options().lock_timeout, Duration::from_millis(250));
    assert_eq!(store.root(), dir.path());
    assert_eq!(store.lock_file("nb1"), dir.path().join("locks").join("nb1.lock"));

    // Writes through the repository land in the returned store.
    repo.initialize("nb1", ContentType::Notebook, &snap(json!({"cell1": "a"})), AUTHOR, "init")?;
    assert!(store.contains("branches/nb1/trunk")?);
    Ok(())
}

#[test]
fn kv_contract_on_disk() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let kv = FsStore::open(dir.path())?;
    assert!(FsStore::exists(dir.path()));

    kv.put("versions/nb1/b", b"2")?;
    kv.put("versions/nb1/a", b"1")?;
    kv.put("versions/nb2/c", b"3")?;

    assert_eq!(kv.get("versions/nb1/a")?, Some(b"1".to_vec()));
    assert_eq!(kv.list("versions/nb1/")?, vec!["versions/nb1/a", "versions/nb1/b"]);
    assert_eq!(kv.list("versions/")?.len(), 3);
    assert!(kv.list("missing/")?.is_empty());

    assert!(kv.delete("versions/nb1/a")?);
    assert!(!kv.delete("versions/nb1/a")?);
    assert!(!kv.contains("versions/nb1/a")?);

    assert!(matches!(kv.put("../escape", b"x"), Err(Error::Storage(_))));
    Ok(())
}
