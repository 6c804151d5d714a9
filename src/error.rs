//! Error types for revkeep
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, unknown content/version/branch, duplicates)
//! - 3: Blocked (no-op commit, empty merge, branch in use, bad transition)
//! - 4: Operation failed (storage, disjoint history, IO)
//! - 5: Retryable (lock timeout, cancellation)

use std::fmt;

use thiserror::Error;

/// Exit codes for the revkeep CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
    pub const RETRYABLE: i32 = 5;
}

/// What kind of record a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Content,
    Version,
    Snapshot,
    Branch,
    MergeRequest,
    Backup,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::Content => "content",
            EntityKind::Version => "version",
            EntityKind::Snapshot => "snapshot",
            EntityKind::Branch => "branch",
            EntityKind::MergeRequest => "merge request",
            EntityKind::Backup => "backup",
        };
        f.write_str(label)
    }
}

/// Main error type for revkeep operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("Content already initialized: {0}")]
    DuplicateContent(String),

    #[error("Branch '{name}' already exists for {content_id}")]
    DuplicateBranch { content_id: String, name: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Blocked (exit code 3)
    #[error("No changes to commit on {content_id}/{branch}")]
    NoChanges { content_id: String, branch: String },

    #[error("Nothing to merge: {source_branch} is already contained in {target_branch}")]
    EmptyMerge {
        source_branch: String,
        target_branch: String,
    },

    #[error("Branch '{name}' is in use: {reason}")]
    BranchInUse { name: String, reason: String },

    #[error("Merge request {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },

    // Operation failures (exit code 4)
    #[error("No common ancestor between {source_version} and {target_version}")]
    DisjointHistory {
        source_version: String,
        target_version: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // Retryable (exit code 5)
    #[error("Timed out waiting for the lock on {resource}")]
    Concurrency { resource: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NotFound { .. }
            | Error::DuplicateContent(_)
            | Error::DuplicateBranch { .. }
            | Error::Validation(_)
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_) => exit_codes::USER_ERROR,

            Error::NoChanges { .. }
            | Error::EmptyMerge { .. }
            | Error::BranchInUse { .. }
            | Error::InvalidTransition { .. } => exit_codes::BLOCKED,

            Error::DisjointHistory { .. }
            | Error::Storage(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_) => exit_codes::OPERATION_FAILED,

            Error::Concurrency { .. } | Error::Cancelled => exit_codes::RETRYABLE,
        }
    }

    /// Stable snake_case name of the error kind, for structured output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::DuplicateContent(_) => "duplicate_content",
            Error::DuplicateBranch { .. } => "duplicate_branch",
            Error::Validation(_) => "validation",
            Error::InvalidConfig(_) => "invalid_config",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::NoChanges { .. } => "no_changes",
            Error::EmptyMerge { .. } => "empty_merge",
            Error::BranchInUse { .. } => "branch_in_use",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::DisjointHistory { .. } => "disjoint_history",
            Error::Storage(_) | Error::Io(_) => "storage",
            Error::Json(_) | Error::TomlParse(_) | Error::TomlSerialize(_) => "serialization",
            Error::Concurrency { .. } => "concurrency",
            Error::Cancelled => "cancelled",
        }
    }

    /// True when the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        self.exit_code() == exit_codes::RETRYABLE
    }

    /// Structured details for JSON error output, when the error carries any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::NotFound { kind, id } => Some(serde_json::json!({
                "entity": kind.to_string(),
                "id": id,
            })),
            Error::DuplicateBranch { content_id, name } | Error::NoChanges { content_id, branch: name } => {
                Some(serde_json::json!({
                    "content_id": content_id,
                    "branch": name,
                }))
            }
            Error::DisjointHistory {
                source_version,
                target_version,
            } => Some(serde_json::json!({
                "source_version": source_version,
                "target_version": target_version,
            })),
            Error::Concurrency { resource } => Some(serde_json::json!({
                "resource": resource,
            })),
            _ => None,
        }
    }
}

/// Result type alias for revkeep operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            kind: err.kind(),
            details: err.details(),
        }
    }
}
