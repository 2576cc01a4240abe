//! Review collaborator adapter.
//!
//! Review judgment is external; the workflow only needs a verdict it can
//! record. A configured command receives the diff on stdin and the task id as
//! its last argument, and answers through its exit code:
//!
//! | exit | verdict         |
//! |------|-----------------|
//! | 0    | `ready`         |
//! | 1    | `needs_changes` |
//! | 2    | `blocked`       |
//!
//! Non-empty stdout lines become review notes.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::types::ReviewVerdict;
use crate::io::process::{CommandRunner, CommandSpec, SystemRunner};

/// What the reviewer gets to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    pub workdir: PathBuf,
    pub task_id: String,
    pub task_title: String,
    /// Diff of the working tree against `HEAD`.
    pub diff: String,
    pub changed_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub verdict: ReviewVerdict,
    pub notes: Vec<String>,
}

pub trait Reviewer {
    fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome>;
}

impl<T: Reviewer + ?Sized> Reviewer for &T {
    fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome> {
        (**self).review(request)
    }
}

impl<T: Reviewer + ?Sized> Reviewer for Box<T> {
    fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome> {
        (**self).review(request)
    }
}

/// Reviewer used when no review command is configured.
pub struct SkipReviewer;

impl Reviewer for SkipReviewer {
    fn review(&self, _request: &ReviewRequest) -> Result<ReviewOutcome> {
        Ok(ReviewOutcome {
            verdict: ReviewVerdict::Ready,
            notes: vec!["review skipped (no review.command configured)".to_string()],
        })
    }
}

/// Reviewer that runs an external command.
pub struct CommandReviewer<R = SystemRunner> {
    command: Vec<String>,
    runner: R,
}

impl<R: CommandRunner> CommandReviewer<R> {
    pub fn new(command: Vec<String>, runner: R) -> Self {
        Self { command, runner }
    }
}

impl<R: CommandRunner> Reviewer for CommandReviewer<R> {
    #[instrument(skip_all, fields(task = %request.task_id))]
    fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome> {
        let (program, leading) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("review command is empty"))?;
        let spec = CommandSpec::new(program.as_str(), &request.workdir)
            .args(leading.iter().map(String::as_str))
            .arg(request.task_id.as_str())
            .stdin(request.diff.as_bytes());
        debug!(files = request.changed_files.len(), "invoking reviewer");

        let output = self.runner.run(&spec)?;
        let verdict = output
            .code
            .and_then(verdict_from_exit)
            .ok_or_else(|| {
                anyhow!(
                    "{spec} exited with {:?}: {}",
                    output.code,
                    output.stderr_text().trim()
                )
            })?;
        let notes = output
            .stdout_text()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        info!(verdict = %verdict, "review finished");
        Ok(ReviewOutcome { verdict, notes })
    }
}

pub fn verdict_from_exit(code: i32) -> Option<ReviewVerdict> {
    match code {
        0 => Some(ReviewVerdict::Ready),
        1 => Some(ReviewVerdict::NeedsChanges),
        2 => Some(ReviewVerdict::Blocked),
        _ => None,
    }
}

/// Reviewer for a configured command; an empty command skips review.
pub fn reviewer_for<R: CommandRunner + 'static>(command: &[String], runner: R) -> Box<dyn Reviewer> {
    if command.is_empty() {
        Box::new(SkipReviewer)
    } else {
        Box::new(CommandReviewer::new(command.to_vec(), runner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::process::CommandOutput;
    use crate::test_support::ScriptedRunner;

    fn request() -> ReviewRequest {
        ReviewRequest {
            workdir: PathBuf::from("/work/app"),
            task_id: "bd-2".to_string(),
            task_title: "Fix parser".to_string(),
            diff: "+fn parse() {}\n".to_string(),
            changed_files: vec!["src/parse.rs".to_string()],
        }
    }

    #[test]
    fn exit_codes_map_to_verdicts() {
        assert_eq!(verdict_from_exit(0), Some(ReviewVerdict::Ready));
        assert_eq!(verdict_from_exit(1), Some(ReviewVerdict::NeedsChanges));
        assert_eq!(verdict_from_exit(2), Some(ReviewVerdict::Blocked));
        assert_eq!(verdict_from_exit(127), None);
    }

    #[test]
    fn command_reviewer_sends_diff_and_collects_notes() {
        let runner = ScriptedRunner::new().respond(
            "bd-2",
            CommandOutput {
                code: Some(1),
                stdout: b"missing tests\n\n  unclear naming \n".to_vec(),
                ..CommandOutput::default()
            },
        );
        let reviewer = CommandReviewer::new(
            vec!["review".to_string(), "--strict".to_string()],
            &runner,
        );

        let outcome = reviewer.review(&request()).expect("review");
        assert_eq!(outcome.verdict, ReviewVerdict::NeedsChanges);
        assert_eq!(outcome.notes, vec!["missing tests", "unclear naming"]);

        let calls = runner.calls();
        let call = &calls[0];
        assert_eq!(call.to_string(), "review --strict bd-2");
        assert_eq!(call.stdin.as_deref(), Some(b"+fn parse() {}\n".as_slice()));
    }

    #[test]
    fn unknown_exit_code_is_an_error() {
        let runner = ScriptedRunner::new().fail("bd-2", 127, "review: not found");
        let reviewer = CommandReviewer::new(vec!["review".to_string()], &runner);
        let err = reviewer.review(&request()).unwrap_err();
        assert!(err.to_string().contains("review: not found"));
    }

    #[test]
    fn empty_command_skips_review() {
        let reviewer = reviewer_for(&[], SystemRunner::default());
        let outcome = reviewer.review(&request()).expect("review");
        assert_eq!(outcome.verdict, ReviewVerdict::Ready);
    }
}
