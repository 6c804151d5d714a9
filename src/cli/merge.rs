//! revkeep merge and merge request commands

use serde::Serialize;

use crate::cli::CommandContext;
use crate::error::Result;
use crate::graph::short_id;
use crate::merge::{summarize_conflicts, MergeRequest, MergeStatus};
use crate::output::Report;

/// Options for `revkeep merge`
pub struct MergeOptions {
    pub content_id: String,
    pub source: String,
    pub into: Option<String>,
    pub message: Option<String>,
    pub preview: bool,
}

#[derive(Serialize)]
struct ListReport<'a> {
    content_id: &'a str,
    requests: &'a [MergeRequest],
}

pub fn run_merge(ctx: &CommandContext, options: MergeOptions) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let target = handle.branch_or_default(&options.content_id, options.into)?;

    if options.preview {
        let preview = handle
            .repo
            .preview_merge(&options.content_id, &options.source, &target)?;

        let mut report = Report::for_content(&options.content_id, format!("revkeep merge --preview: {}", options.source))
            .on_branch(&target);
        report.fact("base", short_id(&preview.base_version_id));
        report.fact("conflicts", preview.conflicts.len().to_string());
        for line in summarize_conflicts(&preview.conflicts) {
            report.warn(line);
        }
        return report.emit(
     ctx.output,
     "merge", &preview);
    }

    let author = ctx.resolve_actor()?;
    let _lock = handle.lock_content(&options.content_id)?;
    let request = handle.repo.merge(
        &options.content_id,
        &options.source,
        &target,
        &author,
        options.message.as_deref().unwrap_or_default(),
    )?;

    let mut report = Report::for_content(
        &options.content_id,
        format!("revkeep merge: {} ({})", options.source, request.status),
    )
    .on_branch(&target);
    push_request_summary(&mut report, &request);
    if request.status == MergeStatus::Conflict {
        report.suggest(format!(
            "revkeep commit {} --branch {target} --resolves {} -m \"resolve\" --file <resolved.json>",
            options.content_id, request.id
        ));
        report.suggest(format!(
            "revkeep mr reject {} {}",
            options.content_id, request.id
        ));
    }

    report.emit(ctx.output, "merge", &request)
}

pub fn run_show(ctx: &CommandContext, content_id: &str, id: &str) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let request = handle.repo.get_merge_request(content_id, id)?;

    let mut report = Report::for_content(content_id, format!("revkeep mr show: {}", request.id))
        .on_branch(&request.target_branch);
    push_request_summary(&mut report, &request);

    report.emit(ctx.output, "mr show", &request)
}

pub fn run_list(ctx: &CommandContext, content_id: &str, status: Option<&str>) -> Result<()> {
    let status = status.map(str::parse::<MergeStatus>).transpose()?;
    let handle = ctx.open_store(false)?;
    let requests = handle.repo.list_merge_requests(content_id, status)?;

    let mut report = Report::for_content(content_id, "revkeep mr list");
    for request in &requests {
        report.line(format!(
            "{} {} -> {} [{}]",
            request.id, request.source_branch, request.target_branch, request.status
        ));
    }
    report.fact("requests", requests.len().to_string());

    report.emit(ctx.output, "mr list",
     &ListReport {
         content_id,
         requests: &requests,
     },
 )
}

pub fn run_reject(ctx: &CommandContext, content_id: &str, id: &str) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let _lock = handle.lock_content(content_id)?;
    let request = handle.repo.reject_merge_request(content_id, id)?;

    let mut report = Report::for_content(content_id, format!("revkeep mr reject: {}", request.id))
        .on_branch(&request.target_branch);
    push_request_summary(&mut report, &request);

    report.emit(ctx.output, "mr reject", &request)
}

pub fn run_close(ctx: &CommandContext, content_id: &str, id: &str, version_id: &str) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let _lock = handle.lock_content(content_id)?;
    let request = handle.repo.close_merge_request(content_id, id, version_id)?;

    let mut report = Report::for_content(content_id, format!("revkeep mr close: {}", request.id))
        .on_branch(&request.target_branch);
    push_request_summary(&mut report, &request);

    report.emit(ctx.output, "mr close", &request)
}

fn push_request_summary(report: &mut Report, request: &MergeRequest) {
    report.fact("request", request.id.clone());
    report.fact("status", request.status.to_string());
    report.fact(
        "branches",
        format!("{} -> {}", request.source_branch, request.target_branch),
    );
    if let Some(version_id) = &request.merge_version_id {
        report.fact("merge version", version_id.clone());
    }
    for line in summarize_conflicts(&request.conflicts) {
        report.warn(format!("conflict: {line}"));
    }
}
