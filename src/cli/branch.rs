//! revkeep branch command implementation

use crate::branch::Branch;
use crate::cli::CommandContext;
use crate::error::Result;
use crate::graph::short_id;
use crate::output::Report;

pub fn run_create(ctx: &CommandContext, content_id: &str, name: &str, from: Option<String>) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let author = ctx.resolve_actor()?;

    let _lock = handle.lock_content(content_id)?;
    let from = match from {
        Some(version) => version,
        None => {
            let default_branch = handle.repo.content(content_id)?.default_branch;
            handle.repo.get_branch(content_id, &default_branch)?.head_version_id
        }
    };
    let branch = handle.repo.create_branch(content_id, name, &from, &author)?;

    let mut report = Report::for_content(content_id, "revkeep branch create").on_branch(name);
    push_branch_summary(&mut report, &branch);
    report.suggest(format!(
        "revkeep commit {content_id} --branch {name} -m \"...\" --file <snapshot.json>"
    ));

    report.emit(ctx.output, "branch create", &branch)
}

pub fn run_delete(ctx: &CommandContext, content_id: &str, name: &str) -> Result<()> {
    let handle = ctx.open_store(false)?;

    let _lock = handle.lock_content(content_id)?;
    let branch = handle.repo.delete_branch(content_id, name)?;

    let mut report = Report::for_content(content_id, "revkeep branch delete").on_branch(name);
    report.fact("head was", branch.head_version_id.clone());
    report.line("versions on the branch are kept");

    report.emit(ctx.output, "branch delete", &branch)
}

pub fn run_list(ctx: &CommandContext, content_id: &str, pattern: Option<&str>) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let branches = handle.repo.list_branches(content_id, pattern)?;
    let default_branch = handle.repo.content(content_id)?.default_branch;

    let mut report = Report::for_content(content_id, "revkeep branch list");
    for branch in &branches {
        let marker = if branch.name == default_branch { "*" } else { " " };
        report.line(format!(
            "{marker} {} {}",
            branch.name,
            short_id(&branch.head_version_id)
        ));
    }
    if branches.is_empty() {
        report.fact("branches", "none");
    }

    report.emit(ctx.output, "branch list", &branches)
}

pub fn run_show(ctx: &CommandContext, content_id: &str, name: &str) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let branch = handle.repo.get_branch(content_id, name)?;

    let mut report = Report::for_content(content_id, "revkeep branch show").on_branch(name);
    push_branch_summary(&mut report, &branch);

    report.emit(ctx.output, "branch show", &branch)
}

fn push_branch_summary(report: &mut Report, branch: &Branch) {
    report.fact("head", branch.head_version_id.clone());
    report.fact("created from", branch.created_from_version.clone());
    report.fact("updated", branch.updated_at.to_rfc3339());
}
