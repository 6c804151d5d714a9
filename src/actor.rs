//! Author identity for CLI commands.
//!
//! Resolution order:
//! 1) CLI --actor (explicit)
//! 2) REVKEEP_ACTOR environment variable
//! 3) Persisted value in `<store>/actor`
//! 4) Config default (actor.default) or "unknown"

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};

const ACTOR_FILENAME: &str = "actor";

/// Environment variable naming the actor
pub const ACTOR_ENV: &str = "REVKEEP_ACTOR";

/// Resolve the current actor using CLI, environment, persisted value, and config.
pub fn resolve_actor(store_root: Option<&Path>, cli_actor: Option<&str>) -> Result<String> {
    if let Some(actor) = non_empty(cli_actor) {
        return Ok(actor.to_string());
    }

    if let Ok(env_actor) = std::env::var(ACTOR_ENV) {
        if let Some(actor) = non_empty(Some(env_actor.as_str())) {
            return Ok(actor.to_string());
        }
    }

    if let Some(root) = store_root {
        if let Some(actor) = load_persisted_actor(root)? {
            return Ok(actor);
        }
        return Ok(Config::load_from_root(root).actor.default);
    }

    Ok("unknown".to_string())
}

/// Persist the actor identity in `<store>/actor`.
pub fn persist_actor(store_root: &Path, actor: &str) -> Result<()> {
    let actor = non_empty(Some(actor))
        .ok_or_else(|| Error::InvalidArgument("actor name cannot be empty".to_string()))?;

    std::fs::create_dir_all(store_root)?;
    crate::lock::write_atomic(actor_path(store_root), format!("{actor}\n").as_bytes())
}

/// Load the actor identity from `<store>/actor`, if present.
pub fn load_persisted_actor(store_root: &Path) -> Result<Option<String>> {
    let path = actor_path(store_root);
    if !path.exists() {
        return Ok(None);
    }

    let raw = std::fs::read_to_string(path)?;
    Ok(non_empty(Some(raw.as_str())).map(str::to_string))
}

fn actor_path(store_root: &Path) -> PathBuf {
    store_root.join(ACTOR_FILENAME)
}

fn non_empty(input: Option<&str>) -> Option<&str> {
    input.map(str::trim).filter(|value| !value.is_empty())
}
