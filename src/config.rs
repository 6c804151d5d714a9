//! Configuration loading and management
//!
//! Handles parsing of `revkeep.toml` in the store root.

use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the configuration file inside a store root
pub const CONFIG_FILENAME: &str = "revkeep.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Branch created by `initialize`
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Actor configuration
    #[serde(default)]
    pub actor: ActorConfig,

    /// Backup policy
    #[serde(default)]
    pub backup: BackupConfig,

    /// Lock configuration
    #[serde(default)]
    pub locking: LockingConfig,

    /// History configuration
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            actor: ActorConfig::default(),
            backup: BackupConfig::default(),
            locking: LockingConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

/// Actor-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Default actor name when none specified
    #[serde(default = "default_actor")]
    pub default: String,
}

fn default_actor() -> String {
    "unknown".to_string()
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            default: default_actor(),
        }
    }
}

/// Backup policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Take an auto backup every N commits on a content item (0 disables)
    #[serde(default = "default_auto_every")]
    pub auto_every: u32,

    /// Lifetime of auto backups
    #[serde(default = "default_auto_ttl")]
    pub auto_ttl: String,

    /// Manual backups kept by an explicit prune
    #[serde(default = "default_max_manual")]
    pub max_manual: usize,

    /// Auto backup the root version on initialize
    #[serde(default = "default_true")]
    pub on_initialize: bool,

    /// Auto backup the head before merge, revert and restore
    #[serde(default = "default_true")]
    pub before_operations: bool,
}

fn default_auto_every() -> u32 {
    10
}

fn default_auto_ttl() -> String {
    "7d".to_string()
}

fn default_max_manual() -> usize {
    20
}

fn default_true() -> bool {
    true
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            auto_every: default_auto_every(),
            auto_ttl: default_auto_ttl(),
            max_manual: default_max_manual(),
            on_initialize: true,
            before_operations: true,
        }
    }
}

/// Lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingConfig {
    /// How long a mutating operation waits for its content lock
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    crate::lock::DEFAULT_LOCK_TIMEOUT_MS
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// History configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Width of the timestamp bucket folded into version ids
    #[serde(default = "default_timestamp_bucket_ms")]
    pub timestamp_bucket_ms: u64,
}

fn default_timestamp_bucket_ms() -> u64 {
    1000
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            timestamp_bucket_ms: default_timestamp_bucket_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a `revkeep.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a store root, or return defaults
    pub fn load_from_root(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILENAME);
        if config_path.exists() {
            match Self::load(&config_path) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(path = %config_path.display(), error = %err, "ignoring invalid config");
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        crate::lock::write_atomic(path, content.as_bytes())
    }

    /// Resolve into the typed options the repository runs with.
    pub fn repository_options(&self) -> Result<RepositoryOptions> {
        self.validate()?;
        Ok(RepositoryOptions {
            default_branch: self.default_branch.clone(),
            auto_backup_every: self.backup.auto_every,
            auto_backup_ttl: parse_duration(&self.backup.auto_ttl)?,
            max_manual_backups: self.backup.max_manual,
            backup_on_initialize: self.backup.on_initialize,
            backup_before_operations: self.backup.before_operations,
            lock_timeout: StdDuration::from_millis(self.locking.timeout_ms),
            timestamp_bucket_ms: self.history.timestamp_bucket_ms,
        })
    }

    fn validate(&self) -> Result<()> {
        crate::branch::validate_branch_name(&self.default_branch)
            .map_err(|err| Error::InvalidConfig(format!("default_branch: {err}")))?;
        parse_duration(&self.backup.auto_ttl)
            .map_err(|err| Error::InvalidConfig(format!("backup.auto_ttl: {err}")))?;
        if self.history.timestamp_bucket_ms == 0 {
            return Err(Error::InvalidConfig(
                "history.timestamp_bucket_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolved runtime options for a [`crate::repo::Repository`].
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    pub default_branch: String,
    pub auto_backup_every: u32,
    pub auto_backup_ttl: Duration,
    pub max_manual_backups: usize,
    pub backup_on_initialize: bool,
    pub backup_before_operations: bool,
    pub lock_timeout: StdDuration,
    pub timestamp_bucket_ms: u64,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            auto_backup_every: default_auto_every(),
            auto_backup_ttl: Duration::days(7),
            max_manual_backups: default_max_manual(),
            backup_on_initialize: true,
            backup_before_operations: true,
            lock_timeout: StdDuration::from_millis(default_lock_timeout_ms()),
            timestamp_bucket_ms: default_timestamp_bucket_ms(),
        }
    }
}

/// Parse a duration string like "30s", "2h", "7d".
///
/// A bare number is read as minutes.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    if s.is_empty() {
        return Err(Error::InvalidArgument("Duration cannot be empty".to_string()));
    }

    let (num_str, unit) = if let Some(pos) = s.find(|c: char| !c.is_ascii_digit()) {
        (&s[..pos], &s[pos..])
    } else {
        (s, "m")
    };

    let num: i64 = num_str
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("Invalid duration number: {}", num_str)))?;

    let duration = match unit.to_lowercase().as_str() {
        "s" | "sec" | "second" | "seconds" => Duration::seconds(num),
        "m" | "min" | "minute" | "minutes" => Duration::minutes(num),
        "h" | "hr" | "hour" | "hours" => Duration::hours(num),
        "d" | "day" | "days" => Duration::days(num),
        "w" | "week" | "weeks" => Duration::weeks(num),
        _ => {
            return Err(Error::InvalidArgument(format!(
                "Invalid duration unit '{}'. Expected: s, m, h, d, w",
                unit
            )));
        }
    };

    Ok(duration)
}
