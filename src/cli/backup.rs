//! revkeep backup command implementation

use serde::Serialize;

use crate::backup::{Backup, BackupType};
use crate::cli::content::push_version_summary;
use crate::cli::CommandContext;
use crate::error::Result;
use crate::graph::Version;
use crate::output::Report;

#[derive(Serialize)]
struct PruneReport {
    expired: Vec<Backup>,
    pruned: Vec<Backup>,
}

#[derive(Serialize)]
struct RestoreReport<'a> {
    backup: &'a Backup,
    branch: &'a str,
    version: &'a Version,
}

pub fn run_create(ctx: &CommandContext, content_id: &str, version: Option<&str>, reason: Option<&str>) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let _lock = handle.lock_content(content_id)?;
    let backup = handle
        .repo
        .create_backup_with_reason(content_id, version, BackupType::Manual, reason)?;

    let mut report = Report::for_content(content_id, format!("revkeep backup create: {}", backup.id));
    push_backup_summary(&mut report, &backup);
    report.suggest(format!("revkeep backup restore {}", backup.id));

    report.emit(
        ctx.output,
        "backup create", &backup)
}

pub fn run_list(ctx: &CommandContext, content_id: &str) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let backups = handle.repo.list_backups(content_id)?;

    let mut report = Report::for_content(content_id, "revkeep backup list");
    for backup in &backups {
        let expiry = backup
            .expires_at
            .map(|at| format!(" expires {}", at.to_rfc3339()))
            .unwrap_or_default();
        report.line(format!(
            "{} {} {}{expiry}{}",
            backup.id,
            backup.backup_type,
            crate::graph::short_id(&backup.version_id),
            backup
                .reason
                .as_deref()
                .map(|reason| format!(" ({reason})"))
                .unwrap_or_default()
        ));
    }
    report.fact("backups", backups.len().to_string());

    report.emit(ctx.output, "backup list", &backups)
}

pub fn run_restore(ctx: &CommandContext, backup_id: &str, branch: Option<String>) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let author = ctx.resolve_actor()?;
    let backup = handle.repo.get_backup(backup_id)?;
    let branch = handle.branch_or_default(&backup.content_id, branch)?;

    let _lock = handle.lock_content(&backup.content_id)?;
    let version = handle.repo.restore_backup(backup_id, &branch, &author)?;

    let mut report = Report::for_content(&backup.content_id, format!("revkeep backup restore: {backup_id}"))
        .on_branch(&branch);
    push_version_summary(&mut report, &version);

    report.emit(ctx.output, "backup restore",
        &RestoreReport {
            backup: &backup,
            branch: &branch,
            version: &version,
        },
    )
}

pub fn run_delete(ctx: &CommandContext, backup_id: &str) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let backup = handle.repo.get_backup(backup_id)?;
    let _lock = handle.lock_content(&backup.content_id)?;
    let backup = handle.repo.delete_backup(backup_id)?;

    let mut report = Report::for_content(&backup.content_id, format!("revkeep backup delete: {backup_id}"));
    push_backup_summary(&mut report, &backup);

    report.emit(ctx.output, "backup delete", &backup)
}

pub fn run_prune(ctx: &CommandContext, content_id: &str) -> Result<()> {
    let handle = ctx.open_store(false)?;
    let _lock = handle.lock_content(content_id)?;
    let expired = handle.repo.purge_expired_backups(content_id)?;
    let pruned = handle.repo.prune_manual_backups(content_id)?;

    let mut report = Report::for_content(content_id, "revkeep backup prune");
    report.fact("expired auto backups removed", expired.len().to_string());
    report.fact("manual backups pruned", pruned.len().to_string());

    report.emit(ctx.output, "backup prune", &PruneReport { expired, pruned })
}

fn push_backup_summary(report: &mut Report, backup: &Backup) {
    report.fact("version", backup.version_id.clone());
    report.fact("type", backup.backup_type.to_string());
    if let Some(reason) = &backup.reason {
        report.fact("reason", reason.clone());
    }
}
