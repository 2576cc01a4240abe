//! Product output on stdout: human text, or JSON with `--json`.
//!
//! Diagnostics go through `tracing` on stderr and never mix with this.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{Finding, Session};
use crate::hooks::HookOutcome;
use crate::workflow::{CookReport, PrepReport, ServeReport, StatusReport, TidyReport, WorkReport};

/// Plain-text rendering of a report.
pub trait Render {
    fn render(&self) -> String;
}

/// How reports reach stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    /// Print `report` as pretty JSON, or as text unless quiet.
    pub fn emit<T: Serialize + Render>(&self, report: &T) -> Result<()> {
        if self.json {
            let payload = serde_json::to_string_pretty(report).context("serialize report")?;
            println!("{payload}");
        } else if !self.quiet {
            let text = report.render();
            if !text.is_empty() {
                println!("{text}");
            }
        }
        Ok(())
    }
}

/// Multi-line summary of a session: phase, task, findings, recent work.
pub fn session_summary(session: &Session) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "phase: {}", session.phase);
    if !session.project_dir.is_empty() {
        let _ = writeln!(out, "branch: {}", session.branch);
    }
    match &session.current_task {
        Some(task) => {
            let _ = writeln!(out, "task: {} ({})", task.id, task.title);
        }
        None => out.push_str("task: none\n"),
    }
    let _ = writeln!(out, "findings: {}", session.findings.len());
    for finding in &session.findings {
        let _ = writeln!(
            out,
            "  - [{}] p{} {}",
            finding.kind, finding.priority, finding.title
        );
    }
    if !session.recently_completed.is_empty() {
        let _ = writeln!(
            out,
            "recently completed: {}",
            session.recently_completed.join(", ")
        );
    }
    if let Some(review) = &session.last_review {
        let _ = writeln!(out, "last review: {}", review.verdict);
    }
    out.trim_end().to_string()
}

impl Render for StatusReport {
    fn render(&self) -> String {
        if self.session.is_empty() {
            return format!(
                "no session ({})\nrun `sous prep` to start one",
                self.session_path.display()
            );
        }
        session_summary(&self.session)
    }
}

impl Render for PrepReport {
    fn render(&self) -> String {
        let mut out = String::new();
        if self.replaced_corrupt {
            out.push_str("replaced corrupt session state\n");
        }
        let sync = if self.synced {
            "synced with origin"
        } else {
            "no origin, not synced"
        };
        let _ = writeln!(out, "prepped {} ({sync})", self.branch);
        if self.ready.is_empty() {
            out.push_str("no ready tasks");
        } else {
            let _ = write!(out, "ready tasks:");
            for task in &self.ready {
                let _ = write!(out, "\n  {} {}", task.id, task.title);
            }
        }
        out
    }
}

impl Render for CookReport {
    fn render(&self) -> String {
        let verb = if self.resumed {
            "still cooking"
        } else {
            "cooking"
        };
        format!("{verb} {}: {}", self.task.id, self.task.title)
    }
}

impl Render for ServeReport {
    fn render(&self) -> String {
        let mut out = format!("served {} (review: {})", self.task_id, self.verdict);
        for note in &self.notes {
            let _ = write!(out, "\n  {note}");
        }
        if let Some(finding) = &self.finding {
            let _ = write!(out, "\nrecorded {} finding: {}", finding.kind, finding.title);
        }
        out
    }
}

impl Render for TidyReport {
    fn render(&self) -> String {
        let mut out = String::new();
        if !self.filed.is_empty() {
            let _ = writeln!(out, "filed: {}", self.filed.join(", "));
        }
        let commit = if self.committed {
            "committed and pushed"
        } else {
            "pushed"
        };
        let _ = write!(out, "{commit} {}", short_sha(&self.head));
        if let Some(closed) = &self.closed {
            let _ = write!(out, "\nclosed {closed}");
        }
        for warning in &self.warnings {
            let _ = write!(out, "\nwarning: {warning}");
        }
        out
    }
}

impl Render for WorkReport {
    fn render(&self) -> String {
        let parts = [
            self.prep.as_ref().map(Render::render),
            self.cook.as_ref().map(Render::render),
            self.serve.as_ref().map(Render::render),
            self.tidy.as_ref().map(Render::render),
        ];
        let mut out: Vec<String> = parts.into_iter().flatten().collect();
        out.push(format!("phase: {}", self.phase));
        out.join("\n")
    }
}

impl Render for HookOutcome {
    fn render(&self) -> String {
        self.message.clone()
    }
}

/// Report for `sous reset`.
#[derive(Debug, Clone, Serialize)]
pub struct ResetReport {
    pub cleared: bool,
}

impl Render for ResetReport {
    fn render(&self) -> String {
        "session cleared".to_string()
    }
}

/// Report for `sous find`.
#[derive(Debug, Clone, Serialize)]
pub struct FindingReport {
    pub recorded: Finding,
    /// Findings waiting to be filed at tidy, including this one.
    pub pending: usize,
}

impl Render for FindingReport {
    fn render(&self) -> String {
        format!(
            "recorded {} finding: {} ({} pending for tidy)",
            self.recorded.kind, self.recorded.title, self.pending
        )
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}
