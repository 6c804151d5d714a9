//! revkeep content commands: init, commit, log, show, diff, revert.

use std::path::PathBuf;

use serde::Serialize;

use crate::cli::{read_snapshot, CommandContext};
use crate::diff::DiffResult;
use crate::error::Result;
use crate::graph::{short_id, Version};
use crate::output::Report;
use crate::snapshot::{ContentType, Snapshot};
use crate::trailer::with_merge_request_trailer;

/// Options for `revkeep init`
pub struct InitOptions {
    pub content_id: String,
    pub content_type: String,
    pub file: Option<PathBuf>,
    pub message: String,
}

/// Options for `revkeep commit`
pub struct CommitOptions {
    pub content_id: String,
    pub branch: Option<String>,
    pub file: Option<PathBuf>,
    pub message: String,
    pub resolves: Option<String>,
}

#[derive(Serialize)]
struct VersionReport<'a> {
    branch: &'a str,
    version: &'a Version,
}

#[derive(Serialize)]
struct ShowReport<'a> {
    version: &'a Version,
    snapshot: &'a Snapshot,
}

#[derive(Serialize)]
struct LogReport<'a> {
    content_id: &'a str,
    branch: &'a str,
    versions: &'a [Version],
}

pub fn run_init(ctx: &CommandContext, options: InitOptions) -> Result<()> {
    let content_type: ContentType = options.content_type.parse()?;
    let snapshot = read_snapshot(options.file.as_deref())?;
    let handle = ctx.open_store(true)?;
    let author = ctx.resolve_actor()?;

    let _lock = handle.lock_content(&options.content_id)?;
    let version = handle.repo.initialize(
        &options.content_id,
        content_type,
        &snapshot,
        &author,
        &options.message,
    )?;
    let branch = handle.repo.options().default_branch.clone();

    let mut report = Report::for_content(&options.content_id, format!("revkeep init: {content_type}"))
        .on_branch(&branch);
    push_version_summary(&mut report, &version);
    report.suggest(format!(
        "revkeep commit {} -m \"...\" --file <snapshot.json>",
        options.content_id
    ));

    report.emit(
        ctx.output,
        "init",
        &VersionReport {
            branch: &branch,
            version: &version,
        },
    )
}

pub fn run_commit(ctx: &CommandContext, options: CommitOptions) -> Result<()> {
    let snapshot = read_snapshot(options.file.as_deref())?;
    let handle = ctx.open_store(false)?;
    let author = ctx.resolve_actor()?;
    let branch = handle.branch_or_default(&options.content_id, options.branch)?;
    let message = match &options.resolves {
        Some(request_id) => with_merge_request_trailer(&options.message, request_id),
        None => options.message,
    };

    let _lock = handle.lock_content(&options.content_id)?;
    let version = handle
        .repo
        .commit(&options.content_id, &branch, &snapshot, &author, &message)?;

    let mut report = Report::for_content(&options.content_id, format!("revkeep commit: {}", version.short_id()))
        .on_branch(&branch);
    push_version_summary(&mut report, &version);
    if version.is_merge() {
        report.line(format!(
            "resolves merge of {}",
            version.parent_ids[1..]
                .iter()
                .map(|id| short_id(id))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    report.emit(
        ctx.output,
        "commit",
        &VersionReport {
            branch: &branch,
            version: &version,
        },
    )
}

pub fn run_log(ctx: &CommandContext, content_id: &str, branch: Option<String>, limit: Option<usize>) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let branch = handle.branch_or_default(content_id, branch)?;
    let versions = handle.repo.get_history_limited(content_id, &branch, limit)?;

    let mut report = Report::for_content(content_id, "revkeep log").on_branch(&branch);
    for version in &versions {
        let marker = if version.is_merge() { " (merge)" } else { "" };
        report.line(format!(
            "{} {} {}{marker}: {}",
            version.short_id(),
            version.timestamp.format("%Y-%m-%d %H:%M:%S"),
            version.author_id,
            first_line(&version.message)
        ));
    }
    report.fact("versions", versions.len().to_string());

    report.emit(
        ctx.output,
        "log",
        &LogReport {
            content_id,
            branch: &branch,
            versions: &versions,
        },
    )
}

pub fn run_show(ctx: &CommandContext, content_id: &str, version_id: &str) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let version = handle.repo.get_version_record(content_id, version_id)?;
    let snapshot = handle.repo.get_version(content_id, version_id)?;

    let mut report = Report::for_content(content_id, format!("revkeep show: {}", version.version_id));
    report.fact("author", version.author_id.clone());
    report.fact("date", version.timestamp.to_rfc3339());
    report.fact("message", first_line(&version.message));
    if !version.parent_ids.is_empty() {
        report.fact(
            "parents",
            version
                .parent_ids
                .iter()
                .map(|id| short_id(id))
                .collect::<Vec<_>>()
                .join(" "),
        );
    }
    for (path, value) in snapshot.iter() {
        report.line(format!("{path}: {value}"));
    }

    report.emit(
        ctx.output,
        "show",
        &ShowReport {
            version: &version,
            snapshot: &snapshot,
        },
    )
}

pub fn run_diff(ctx: &CommandContext, content_id: &str, from: &str, to: &str) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let diff = handle.repo.diff(content_id, from, to)?;

    let mut report = Report::for_content(content_id, format!("revkeep diff: {}..{}", short_id(from), short_id(to)));
    push_diff_details(&mut report, &diff);

    report.emit(
        ctx.output,
        "diff", &diff)
}

pub fn run_revert(ctx: &CommandContext, content_id: &str, version_id: &str, branch: Option<String>) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let author = ctx.resolve_actor()?;
    let branch = handle.branch_or_default(content_id, branch)?;

    let _lock = handle.lock_content(content_id)?;
    let version = handle
        .repo
        .revert_to_version(content_id, version_id, &branch, &author)?;

    let mut report = Report::for_content(content_id, format!("revkeep revert: {}", version.short_id()))
        .on_branch(&branch);
    push_version_summary(&mut report, &version);

    report.emit(ctx.output, "revert",
        &VersionReport {
            branch: &branch,
            version: &version,
        },
    )
}

pub(crate) fn push_version_summary(report: &mut Report, version: &Version) {
    report.fact("version", version.version_id.clone());
    report.fact("author", version.author_id.clone());
    report.fact("size", format!("{} bytes", version.size));
}

pub(crate) fn push_diff_details(report: &mut Report, diff: &DiffResult) {
    report.fact("added", diff.summary.added.to_string());
    report.fact("modified", diff.summary.modified.to_string());
    report.fact("deleted", diff.summary.deleted.to_string());
    for (path, value) in &diff.added {
        report.line(format!("+ {path}: {value}"));
    }
    for (path, change) in &diff.modified {
        report.line(format!("~ {path}: {} -> {}", change.old, change.new));
    }
    for path in diff.deleted.keys() {
        report.line(format!("- {path}"));
    }
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().to_string()
}
