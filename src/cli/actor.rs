//! revkeep actor command implementation

use std::path::PathBuf;

use crate::actor;
use crate::cli::CommandContext;
use crate::error::Result;
use crate::output::Report;

#[derive(serde::Serialize)]
struct ActorSetReport {
    actor: String,
    path: PathBuf,
}

#[derive(serde::Serialize)]
struct ActorShowReport {
    actor: String,
}

pub fn run_set(ctx: &CommandContext, name: &str) -> Result<()> {
    actor::persist_actor(&ctx.store, name)?;
    let actor_name = actor::resolve_actor(Some(&ctx.store), Some(name))?;
    let actor_path = ctx.store.join("actor");

    let mut report = Report::new(format!("revkeep actor set: {actor_name}"));
    report.fact("actor", actor_name.clone());
    report.fact("path", actor_path.display().to_string());

    report.emit(
        ctx.output,
        "actor set",
        &ActorSetReport {
            actor: actor_name,
            path: actor_path,
        },
    )
}

pub fn run_show(ctx: &CommandContext) -> Result<()> {
    let actor_name = ctx.resolve_actor()?;

    let mut report = Report::new(format!("revkeep actor: {actor_name}"));
    report.fact("store", ctx.store.display().to_string());

    report.emit(ctx.output, "actor show", &ActorShowReport { actor: actor_name })
}
