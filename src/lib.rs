//! revkeep - version control for structured content
//!
//! This library versions content items (notebooks, visualizations,
//! datasets, scripts) whose state is a snapshot: a mapping from logical
//! path to JSON value.
//!
//! # Core Concepts
//!
//! - **Versions**: immutable, content-addressed commits forming a DAG
//! - **Branches**: named mutable heads per content item
//! - **Merge requests**: three-way merges with explicit conflict state
//! - **Backups**: retained pointers to versions, restored additively
//!
//! # Module Organization
//!
//! - `storage`: key/value contract and the memory/filesystem backends
//! - `store`: typed, content-addressed records over a key/value store
//! - `snapshot`: snapshot model and checksums
//! - `graph`: version ids, history walks, merge bases
//! - `diff`: keyed structural diff
//! - `branch` / `session`: branch management and per-caller active branch
//! - `merge`: merge request state machine and three-way merge
//! - `backup`: backups, retention, restore and revert
//! - `repo`: the [`Repository`] facade tying it together
//! - `cli`, `output`, `actor`: the command-line front end
//!
//! ```
//! use revkeep::{ContentType, Repository, Snapshot};
//! use serde_json::json;
//!
//! let repo = Repository::in_memory();
//! let v0 = repo
//!     .initialize("nb1", ContentType::Notebook, &Snapshot::from_json(json!({"cell1": "a"}))?, "u1", "init")?;
//! let v1 = repo
//!     .commit("nb1", "main", &Snapshot::from_json(json!({"cell1": "a", "cell2": "b"}))?, "u1", "add cell2")?;
//! let diff = repo.diff("nb1", &v0.version_id, &v1.version_id)?;
//! assert_eq!(diff.paths(), vec!["cell2"]);
//! # Ok::<(), revkeep::Error>(())
//! ```

pub mod actor;
pub mod backup;
pub mod branch;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod graph;
pub mod lock;
pub mod merge;
pub mod output;
pub mod repo;
pub mod session;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod trailer;

pub use backup::{Backup, BackupType};
pub use branch::Branch;
pub use cancel::CancelToken;
pub use config::{Config, RepositoryOptions};
pub use diff::{DiffResult, DiffSummary, ValueChange};
pub use error::{Error, Result};
pub use graph::Version;
pub use merge::{MergeConflict, MergeRequest, MergeStatus};
pub use repo::Repository;
pub use session::Session;
pub use snapshot::{ContentType, Snapshot};
pub use storage::{FsStore, KvStore, MemoryStore};
