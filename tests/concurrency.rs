mod support;

use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use revkeep::lock::{ContentLocks, FileLock};
use revkeep::{BackupType, ContentType, Error};
use serde_json::json;

use support::{quiet_options, repo_with, snap, AUTHOR};

#[test]
fn parallel_commits_serialize_into_one_line() {
    let repo = repo_with(quiet_options());
    repo.initialize("ds1", ContentType::Dataset, &snap(json!({"n": 0})), AUTHOR, "init")
        .unwrap();

    const WRITERS: usize = 8;
    let barrier = Barrier::new(WRITERS);
    thread::scope(|scope| {
        for n in 1..=WRITERS {
            let repo = &repo;
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                repo.commit("ds1", "main", &snap(json!({ "n": n })), AUTHOR, "write")
                    .unwrap();
            });
        }
    });

    let history = repo.get_history("ds1", "main").unwrap();
    assert_eq!(history.len(), WRITERS + 1);
    for pair in history.windows(2) {
        assert_eq!(pair[0].parent_ids, vec![pair[1].version_id.clone()]);
    }
    assert_eq!(repo.content("ds1").unwrap().commit_count, WRITERS as u64);
}

#[test]
fn different_contents_do_not_contend() {
    let repo = repo_with(quiet_options());
    for id in ["a", "b", "c"] {
        repo.initialize(id, ContentType::Dataset, &snap(json!({"v": 0})), AUTHOR, "init")
            .unwrap();
    }

    thread::scope(|scope| {
        for id in ["a", "b", "c"] {
            let repo = &repo;
            scope.spawn(move || {
                for v in 1..=5 {
                    repo.commit(id, "main", &snap(json!({ "v": v })), AUTHOR, "bump")
                        .unwrap();
                }
                repo.create_backup(id, None, BackupType::Manual).unwrap();
            });
        }
    });

    for id in ["a", "b", "c"] {
        assert_eq!(repo.get_history(id, "main").unwrap().len(), 6);
        assert_eq!(repo.list_backups(id).unwrap().len(), 1);
    }
}

#[test]
fn held_content_lock_times_out() {
    let locks = ContentLocks::new(Duration::from_millis(20));
    let held = locks.acquire("nb1").unwrap();
    assert_eq!(held.content_id(), "nb1");

    assert!(matches!(
        locks.acquire("nb1"),
        Err(Error::Concurrency { resource }) if resource == "nb1"
    ));
    let other = locks.acquire("nb2").unwrap();
    drop(other);

    drop(held);
    assert!(locks.acquire("nb1").is_ok());
}

#[test]
fn waiter_gets_lock_after_release() {
    let locks = ContentLocks::new(Duration::from_secs(5));
    let held = locks.acquire("nb1").unwrap();

    thread::scope(|scope| {
        let waiter = scope.spawn(|| locks.acquire("nb1").map(|guard| guard.content_id().to_string()));
        thread::sleep(Duration::from_millis(30));
        drop(held);
        assert_eq!(waiter.join().unwrap().unwrap(), "nb1");
    });
}

#[test]
fn file_lock_excludes_second_holder() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locks").join("nb1.lock");

    let first = FileLock::acquire(&path, 100).unwrap();
    assert_eq!(first.path(), path.as_path());
    assert!(FileLock::try_acquire(&path).unwrap().is_none());
    assert!(matches!(
        FileLock::acquire(&path, 30),
        Err(Error::Concurrency { .. })
    ));

    drop(first);
    assert!(FileLock::try_acquire(&path).unwrap().is_some());
}
