#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use assert_cmd::Command;
use revkeep::config::{RepositoryOptions, CONFIG_FILENAME};
use revkeep::{ContentType, Error, KvStore, MemoryStore, Repository, Snapshot, Version};
use serde_json::Value;
use tempfile::TempDir;

pub const AUTHOR: &str = "U1";

pub fn snap(value: Value) -> Snapshot {
    Snapshot::from_json(value).expect("valid snapshot")
}

pub fn repo_with(options: RepositoryOptions) -> Repository {
    Repository::new(Arc::new(MemoryStore::new()), options)
}

/// Options with every automatic backup switched off.
pub fn quiet_options() -> RepositoryOptions {
    RepositoryOptions {
        auto_backup_every: 0,
        backup_on_initialize: false,
        backup_before_operations: false,
        ..RepositoryOptions::default()
    }
}

/// Repository with `nb1` initialized to `{"cell1": "a"}`.
pub fn notebook_repo() -> (Repository, Version) {
    let repo = Repository::in_memory();
    let root = repo
        .initialize(
            "nb1",
            ContentType::Notebook,
            &snap(serde_json::json!({"cell1": "a"})),
            AUTHOR,
            "init",
        )
        .expect("initialize");
    (repo, root)
}

/// [`MemoryStore`] whose puts under one key prefix fail until healed.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing: Mutex<Option<String>>,
}

impl FailingStore {
    pub fn fail_puts_under(&self, prefix: &str) {
        *self.failing.lock().unwrap() = Some(prefix.to_string());
    }

    pub fn heal(&self) {
        *self.failing.lock().unwrap() = None;
    }
}

impl KvStore for FailingStore {
    fn put(&self, key: &str, value: &[u8]) -> revkeep::Result<()> {
        if let Some(prefix) = self.failing.lock().unwrap().as_deref() {
            if key.starts_with(prefix) {
                return Err(Error::Storage(format!("disk full writing {key}")));
            }
        }
        self.inner.put(key, value)
    }

    fn get(&self, key: &str) -> revkeep::Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn list(&self, prefix: &str) -> revkeep::Result<Vec<String>> {
        self.inner.list(prefix)
    }

    fn delete(&self, key: &str) -> revkeep::Result<bool> {
        self.inner.delete(key)
    }
}

/// Repository over a [`FailingStore`] the test keeps a handle to.
pub fn failing_repo(options: RepositoryOptions) -> (Repository, Arc<FailingStore>) {
    let kv = Arc::new(FailingStore::default());
    (Repository::new(kv.clone(), options), kv)
}

/// Filesystem store in a temp dir, driven through the binary.
pub struct TestStore {
    dir: TempDir,
}

impl TestStore {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn store_dir(&self) -> PathBuf {
        self.dir.path().join(".revkeep")
    }

    pub fn write_file(&self, rel_path: &str, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        fs::create_dir_all(self.store_dir())?;
        let path = self.store_dir().join(CONFIG_FILENAME);
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// `revkeep` command running in the temp dir with a fixed actor.
    pub fn cmd(&self) -> Command {
        let mut cmd = revkeep_cmd();
        cmd.current_dir(self.path())
            .env_remove("REVKEEP_STORE")
            .env("REVKEEP_ACTOR", AUTHOR)
            .env_remove("RUST_LOG");
        cmd
    }

    /// Run a command with `--json` and return the envelope's `data`.
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self
            .cmd()
            .arg("--json")
            .args(args)
            .output()
            .expect("run revkeep");
        assert!(
            output.status.success(),
            "revkeep {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stdout)
        );
        let envelope: Value = serde_json::from_slice(&output.stdout).expect("json output");
        envelope["data"].clone()
    }
}

pub fn revkeep_cmd() -> Command {
    Command::cargo_bin("revkeep").expect("binary")
}
