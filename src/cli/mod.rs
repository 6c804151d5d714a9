//! Command-line interface for revkeep
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is implemented in its own submodule.

use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::error::{Error, Result};
use crate::lock::FileLock;
use crate::output::OutputOptions;
use crate::repo::Repository;
use crate::snapshot::Snapshot;
use crate::storage::FsStore;

mod actor;
mod backup;
mod branch;
mod content;
mod merge;

/// Default store directory, relative to the working directory
pub const DEFAULT_STORE_DIR: &str = ".revkeep";

/// revkeep - version control for structured content
///
/// Tracks history, branches, merges and backups of notebooks,
/// visualizations, datasets and scripts stored as path→value snapshots.
#[derive(Parser, Debug)]
#[command(name = "revkeep")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the store directory
    #[arg(long, global = true, env = "REVKEEP_STORE", default_value = DEFAULT_STORE_DIR)]
    pub store: PathBuf,

    /// Author recorded on new versions
    #[arg(long, global = true)]
    pub actor: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start versioning a content item
    Init {
        /// Content id
        content_id: String,

        /// Content type: notebook, visualization, dataset, script
        #[arg(long = "type", default_value = "notebook")]
        content_type: String,

        /// Snapshot JSON file (reads stdin when omitted or "-")
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Message for the root version
        #[arg(short, long, default_value = "initial version")]
        message: String,
    },

    /// Commit a new snapshot on a branch
    Commit {
        content_id: String,

        /// Branch to commit on (default: the content's default branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Snapshot JSON file (reads stdin when omitted or "-")
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Commit message
        #[arg(short, long)]
        message: String,

        /// Merge request this commit resolves
        #[arg(long, value_name = "REQUEST_ID")]
        resolves: Option<String>,
    },

    /// Show branch history (first-parent)
    Log {
        content_id: String,

        #[arg(short, long)]
        branch: Option<String>,

        /// Maximum number of versions
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show a version and its snapshot
    Show {
        content_id: String,

        version_id: String,
    },

    /// Diff two versions
    Diff {
        content_id: String,

        /// Older version
        from: String,

        /// Newer version
        to: String,
    },

    /// Write a new version equal to an earlier one
    Revert {
        content_id: String,

        version_id: String,

        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Branch management
    #[command(subcommand)]
    Branch(BranchCommands),

    /// Merge one branch into another
    Merge {
        content_id: String,

        /// Source branch
        source: String,

        /// Target branch (default: the content's default branch)
        #[arg(long)]
        into: Option<String>,

        /// Merge message
        #[arg(short, long)]
        message: Option<String>,

        /// Show the outcome without writing anything
        #[arg(long)]
        preview: bool,
    },

    /// Merge request management
    #[command(subcommand)]
    Mr(MrCommands),

    /// Backup management
    #[command(subcommand)]
    Backup(BackupCommands),

    /// Set or show actor identity
    #[command(subcommand)]
    Actor(ActorCommands),
}

/// Branch subcommands
#[derive(Subcommand, Debug)]
pub enum BranchCommands {
    /// Create a branch
    Create {
        content_id: String,

        name: String,

        /// Version to branch from (default: head of the default branch)
        #[arg(long)]
        from: Option<String>,
    },

    /// Delete a branch (history is kept)
    Delete { content_id: String, name: String },

    /// List branches
    List {
        content_id: String,

        /// Glob pattern on branch names
        #[arg(short, long)]
        pattern: Option<String>,
    },

    /// Show one branch
    Show { content_id: String, name: String },
}

/// Merge request subcommands
#[derive(Subcommand, Debug)]
pub enum MrCommands {
    /// Show a merge request
    Show { content_id: String, id: String },

    /// List merge requests
    List {
        content_id: String,

        /// Filter by status: pending, merged, conflict, rejected
        #[arg(long)]
        status: Option<String>,
    },

    /// Reject a pending or conflicted merge request
    Reject { content_id: String, id: String },

    /// Mark a conflicted merge request resolved by a version on its target
    Close {
        content_id: String,

        id: String,

        /// Version that resolved the conflict
        #[arg(long)]
        version: String,
    },
}

/// Backup subcommands
#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// Take a manual backup
    #[command(disable_version_flag = true)]
    Create {
        content_id: String,

        /// Version to back up (default: head of the default branch)
        #[arg(long)]
        version: Option<String>,

        /// Free-text reason
        #[arg(long)]
        reason: Option<String>,
    },

    /// List live backups, newest first
    List { content_id: String },

    /// Restore a backup as a new version
    Restore {
        backup_id: String,

        /// Branch to restore onto (default: the content's default branch)
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Delete a backup
    Delete { backup_id: String },

    /// Purge expired auto backups and prune manual backups beyond the limit
    Prune { content_id: String },
}

/// Actor subcommands
#[derive(Subcommand, Debug)]
pub enum ActorCommands {
    /// Persist the actor for this store
    Set { name: String },

    /// Show the resolved actor
    Show,
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let ctx = CommandContext {
            store: self.store,
            actor: self.actor,
            output: OutputOptions {
                json: self.json,
                quiet: self.quiet,
            },
        };

        match self.command {
            Commands::Init {
                content_id,
                content_type,
                file,
                message,
            } => content::run_init(
                &ctx,
                content::InitOptions {
                    content_id,
                    content_type,
                    file,
                    message,
                },
            ),
            Commands::Commit {
                content_id,
                branch,
                file,
                message,
                resolves,
            } => content::run_commit(
                &ctx,
                content::CommitOptions {
                    content_id,
                    branch,
                    file,
                    message,
                    resolves,
                },
            ),
            Commands::Log {
                content_id,
                branch,
                limit,
            } => content::run_log(&ctx, &content_id, branch, limit),
            Commands::Show {
                content_id,
                version_id,
            } => content::run_show(&ctx, &content_id, &version_id),
            Commands::Diff {
                content_id,
                from,
                to,
            } => content::run_diff(&ctx, &content_id, &from, &to),
            Commands::Revert {
                content_id,
                version_id,
                branch,
            } => content::run_revert(&ctx, &content_id, &version_id, branch),
            Commands::Branch(cmd) => match cmd {
                BranchCommands::Create {
                    content_id,
                    name,
                    from,
                } => branch::run_create(&ctx, &content_id, &name, from),
                BranchCommands::Delete { content_id, name } => {
                    branch::run_delete(&ctx, &content_id, &name)
                }
                BranchCommands::List {
                    content_id,
                    pattern,
                } => branch::run_list(&ctx, &content_id, pattern.as_deref()),
                BranchCommands::Show { content_id, name } => {
                    branch::run_show(&ctx, &content_id, &name)
                }
            },
            Commands::Merge {
                content_id,
                source,
                into,
                message,
                preview,
            } => merge::run_merge(
                &ctx,
                merge::MergeOptions {
                    content_id,
                    source,
                    into,
                    message,
                    preview,
                },
            ),
            Commands::Mr(cmd) => match cmd {
                MrCommands::Show { content_id, id } => merge::run_show(&ctx, &content_id, &id),
                MrCommands::List { content_id, status } => {
                    merge::run_list(&ctx, &content_id, status.as_deref())
                }
                MrCommands::Reject { content_id, id } => {
                    merge::run_reject(&ctx, &content_id, &id)
                }
                MrCommands::Close {
                    content_id,
                    id,
                    version,
                } => merge::run_close(&ctx, &content_id, &id, &version),
            },
            Commands::Backup(cmd) => match cmd {
                BackupCommands::Create {
                    content_id,
                    version,
                    reason,
                } => backup::run_create(&ctx, &content_id, version.as_deref(), reason.as_deref()),
                BackupCommands::List { content_id } => backup::run_list(&ctx, &content_id),
                BackupCommands::Restore { backup_id, branch } => {
                    backup::run_restore(&ctx, &backup_id, branch)
                }
                BackupCommands::Delete { backup_id } => backup::run_delete(&ctx, &backup_id),
                BackupCommands::Prune { content_id } => backup::run_prune(&ctx, &content_id),
            },
            Commands::Actor(cmd) => match cmd {
                ActorCommands::Set { name } => actor::run_set(&ctx, &name),
                ActorCommands::Show => actor::run_show(&ctx),
            },
        }
    }
}

impl Commands {
    /// Name reported in the output envelope, e.g. `"mr close"`.
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Init { .. } => "init",
            Commands::Commit { .. } => "commit",
            Commands::Log { .. } => "log",
            Commands::Show { .. } => "show",
            Commands::Diff { .. } => "diff",
            Commands::Revert { .. } => "revert",
            Commands::Merge { .. } => "merge",
            Commands::Branch(cmd) => match cmd {
                BranchCommands::Create { .. } => "branch create",
                BranchCommands::Delete { .. } => "branch delete",
                BranchCommands::List { .. } => "branch list",
                BranchCommands::Show { .. } => "branch show",
            },
            Commands::Mr(cmd) => match cmd {
                MrCommands::Show { .. } => "mr show",
                MrCommands::List { .. } => "mr list",
                MrCommands::Reject { .. } => "mr reject",
                MrCommands::Close { .. } => "mr close",
            },
            Commands::Backup(cmd) => match cmd {
                BackupCommands::Create { .. } => "backup create",
                BackupCommands::List { .. } => "backup list",
                BackupCommands::Restore { .. } => "backup restore",
                BackupCommands::Delete { .. } => "backup delete",
                BackupCommands::Prune { .. } => "backup prune",
            },
            Commands::Actor(cmd) => match cmd {
                ActorCommands::Set { .. } => "actor set",
                ActorCommands::Show => "actor show",
            },
        }
    }
}

/// Global flags shared by every command.
pub(crate) struct CommandContext {
    pub store: PathBuf,
    pub actor: Option<String>,
    pub output: OutputOptions,
}

impl CommandContext {
    /// Open the store, creating it when `create` is set.
    pub fn open_store(&self, create: bool) -> Result<StoreHandle> {
        if !create && !FsStore::exists(&self.store) {
            return Err(Error::InvalidArgument(format!(
                "no revkeep store at {} (run `revkeep init` first)",
                self.store.display()
            )));
        }
        StoreHandle::open(&self.store)
    }

    pub fn resolve_actor(&self) -> Result<String> {
        crate::actor::resolve_actor(Some(&self.store), self.actor.as_deref())
    }
}

/// An opened filesystem store plus its repository.
pub(crate) struct StoreHandle {
    fs: FsStore,
    pub repo: Repository,
}

impl StoreHandle {
    fn open(root: &Path) -> Result<Self> {
        let (repo, fs) = Repository::open_with_store(root)?;
        Ok(Self { fs, repo })
    }

    /// Cross-process lock for mutations of one content item.
    pub fn lock_content(&self, content_id: &str) -> Result<FileLock> {
        crate::store::validate_identifier("content id", content_id)?;
        let timeout_ms = u64::try_from(self.repo.options().lock_timeout.as_millis()).unwrap_or(u64::MAX);
        FileLock::acquire(self.fs.lock_file(content_id), timeout_ms)
    }

    /// Branch to use when none was given.
    pub fn branch_or_default(&self, content_id: &str, branch: Option<String>) -> Result<String> {
        match branch {
            Some(branch) => Ok(branch),
            None => Ok(self.repo.content(content_id)?.default_branch),
        }
    }
}

/// Read a snapshot from a JSON file, or stdin when `file` is `None` or "-".
pub(crate) fn read_snapshot(file: Option<&Path>) -> Result<Snapshot> {
    let raw = match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)?,
        _ => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            raw
        }
    };
    Snapshot::from_json_str(&raw)
}
