//! Command results, printed as a JSON envelope or a short report.
//!
//! Every envelope carries `schema_version`, the command name and, when the
//! command acted on one, the `content_id` and `branch` it touched:
//!
//! ```json
//! {
//!   "schema_version": "revkeep.v1",
//!   "command": "commit",
//!   "status": "success",
//!   "content_id": "nb1",
//!   "branch": "main",
//!   "data": { ... }
//! }
//! ```
//!
//! Failures replace `data` with `error: {message, code, kind, details}`.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::{EntityKind, Error, Result};

pub const SCHEMA_VERSION: &str = "revkeep.v1";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Content item and branch a command acted on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Scope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl Scope {
    pub fn content(content_id: &str) -> Self {
        Self {
            content_id: Some(content_id.to_string()),
            branch: None,
        }
    }

    pub fn on_branch(mut self, branch: &str) -> Self {
        self.branch = Some(branch.to_string());
        self
    }

    /// Scope recoverable from the fields of an error.
    pub fn of_error(err: &Error) -> Self {
        match err {
            Error::NoChanges { content_id, branch } => Self::content(content_id).on_branch(branch),
            Error::DuplicateBranch { content_id, .. } => Self::content(content_id),
            Error::DuplicateContent(content_id)
            | Error::NotFound {
                kind: EntityKind::Content,
                id: content_id,
            } => Self::content(content_id),
            Error::EmptyMerge { target_branch, .. } => Self {
                content_id: None,
                branch: Some(target_branch.clone()),
            },
            _ => Self::default(),
        }
    }

    fn label(&self) -> Option<String> {
        match (&self.content_id, &self.branch) {
            (Some(content_id), Some(branch)) => Some(format!("{content_id} @ {branch}")),
            (Some(content_id), None) => Some(content_id.clone()),
            (None, Some(branch)) => Some(format!("@ {branch}")),
            (None, None) => None,
        }
    }
}

/// What a command prints on success.
///
/// Facts render as an aligned key/value block, lines as an indented body.
/// Warnings and suggested commands also ride along in the JSON envelope.
#[derive(Debug, Clone)]
pub struct Report {
    title: String,
    scope: Scope,
    facts: Vec<(String, String)>,
    lines: Vec<String>,
    warnings: Vec<String>,
    next_steps: Vec<String>,
}

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            scope: Scope::default(),
            facts: Vec::new(),
            lines: Vec::new(),
            warnings: Vec::new(),
            next_steps: Vec::new(),
        }
    }

    pub fn for_content(content_id: &str, title: impl Into<String>) -> Self {
        Self {
            scope: Scope::content(content_id),
            ..Self::new(title)
        }
    }

    pub fn on_branch(mut self, branch: &str) -> Self {
        self.scope = self.scope.on_branch(branch);
        self
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Key/value fact; an empty value prints the key alone.
    pub fn fact(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.facts.push((key.into(), value.into()));
    }

    pub fn line(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        self.warnings.push(text.into());
    }

    /// Command worth running next.
    pub fn suggest(&mut self, command: impl Into<String>) {
        self.next_steps.push(command.into());
    }

    /// Print `data` as an envelope under `--json`, else this report unless quiet.
    pub fn emit<T: Serialize>(&self, options: OutputOptions, command: &str, data: &T) -> Result<()> {
        if options.json {
            let envelope = Envelope {
                schema_version: SCHEMA_VERSION,
                command,
                status: "success",
                scope: &self.scope,
                data: Some(data),
                error: None,
                warnings: self.warnings.clone(),
                next_steps: self.next_steps.clone(),
            };
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        } else if !options.quiet {
            println!("{self}");
        }
        Ok(())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)?;
        if let Some(label) = self.scope.label() {
            write!(f, "\n{label}")?;
        }

        if !self.facts.is_empty() {
            f.write_str("\n")?;
            let width = self.facts.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
            for (key, value) in &self.facts {
                if value.is_empty() {
                    write!(f, "\n  {key}")?;
                } else {
                    write!(f, "\n  {key:<width$}  {value}")?;
                }
            }
        }

        if !self.lines.is_empty() {
            f.write_str("\n")?;
            for line in &self.lines {
                write!(f, "\n    {line}")?;
            }
        }

        if !self.warnings.is_empty() {
            f.write_str("\n")?;
            for warning in &self.warnings {
                write!(f, "\nwarning: {warning}")?;
            }
        }

        if !self.next_steps.is_empty() {
            f.write_str("\n\nnext:")?;
            for step in &self.next_steps {
                write!(f, "\n  {step}")?;
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    status: &'static str,
    #[serde(flatten)]
    scope: &'a Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    next_steps: Vec<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: i32,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// Report a failed command: an error envelope on stdout under `--json`,
/// otherwise the message, its details and hints on stderr.
pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    if json {
        let scope = Scope::of_error(err);
        let envelope = Envelope::<()> {
            schema_version: SCHEMA_VERSION,
            command,
            status: "error",
            scope: &scope,
            data: None,
            error: Some(ErrorBody {
                message: err.to_string(),
                code: err.exit_code(),
                kind: err.kind(),
                details: err.details(),
            }),
            warnings: Vec::new(),
            next_steps: error_hints(err),
        };
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(());
    }

    eprintln!("{}", format_error(err, &error_hints(err)));
    Ok(())
}

/// Human form of an error: message, one line per detail field, then hints.
pub fn format_error(err: &Error, hints: &[String]) -> String {
    let mut out = format!("error: {err}");
    if let Some(Value::Object(details)) = err.details() {
        for (key, value) in &details {
            match value {
                Value::String(text) => out.push_str(&format!("\n  {key}: {text}")),
                other => out.push_str(&format!("\n  {key}: {other}")),
            }
        }
    }
    for hint in hints {
        out.push_str(&format!("\nhint: {hint}"));
    }
    out
}

/// Commands that usually get past `err`.
pub fn error_hints(err: &Error) -> Vec<String> {
    match err {
        Error::NotFound {
            kind: EntityKind::Content,
            id,
        } => vec![format!("revkeep init {id} --file <snapshot.json>")],
        Error::NotFound {
            kind: EntityKind::Branch,
            ..
        } => vec!["revkeep branch list <content-id>".to_string()],
        Error::NotFound {
            kind: EntityKind::Backup,
            ..
        } => vec!["revkeep backup list <content-id>".to_string()],
        Error::NoChanges { content_id, branch } => {
            vec![format!("revkeep log {content_id} --branch {branch}")]
        }
        Error::EmptyMerge { source_branch, .. } => {
            vec![format!("nothing to do until {source_branch} gets new commits")]
        }
        Error::BranchInUse { .. } => vec!["revkeep mr list <content-id> --status pending".to_string()],
        Error::InvalidConfig(_) => vec!["fix revkeep.toml then retry".to_string()],
        Error::Concurrency { .. } | Error::Cancelled => vec!["retry the command".to_string()],
        _ => Vec::new(),
    }
}
