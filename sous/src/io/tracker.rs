//! Issue tracker boundary.
//!
//! The workflow reads ready work from, and writes status changes to, the
//! beads CLI (`bd`). Task identifiers and titles are opaque here; the tracker
//! owns the dependency graph.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::types::{Finding, FindingKind};
use crate::io::process::{CommandRunner, CommandSpec, SystemRunner, run_checked};

/// Status set on a task when cooking starts.
pub const STATUS_IN_PROGRESS: &str = "in_progress";

/// A task as reported by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerTask {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl TrackerTask {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            priority: None,
            status: None,
        }
    }
}

/// Operations the workflow needs from the issue tracker.
pub trait Tracker {
    /// Tasks with no unresolved blockers, in tracker order.
    fn ready(&self) -> Result<Vec<TrackerTask>>;
    fn show(&self, id: &str) -> Result<TrackerTask>;
    fn update_status(&self, id: &str, status: &str) -> Result<()>;
    fn close(&self, id: &str) -> Result<()>;
    /// File a finding as a new issue; returns the new issue id.
    fn create(&self, finding: &Finding) -> Result<String>;
    fn sync(&self) -> Result<()>;
}

impl<T: Tracker + ?Sized> Tracker for &T {
    fn ready(&self) -> Result<Vec<TrackerTask>> {
        (**self).ready()
    }
    fn show(&self, id: &str) -> Result<TrackerTask> {
        (**self).show(id)
    }
    fn update_status(&self, id: &str, status: &str) -> Result<()> {
        (**self).update_status(id, status)
    }
    fn close(&self, id: &str) -> Result<()> {
        (**self).close(id)
    }
    fn create(&self, finding: &Finding) -> Result<String> {
        (**self).create(finding)
    }
    fn sync(&self) -> Result<()> {
        (**self).sync()
    }
}

/// Tracker backed by the `bd` CLI.
#[derive(Debug, Clone)]
pub struct BeadsTracker<R = SystemRunner> {
    command: Vec<String>,
    workdir: PathBuf,
    runner: R,
}

impl<R: CommandRunner> BeadsTracker<R> {
    /// `command` is the executable plus leading arguments, e.g. `["bd"]`.
    pub fn new(command: Vec<String>, workdir: impl Into<PathBuf>, runner: R) -> Self {
        Self {
            command,
            workdir: workdir.into(),
            runner,
        }
    }

    fn spec(&self, args: &[&str]) -> Result<CommandSpec> {
        let (program, leading) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("tracker command is empty"))?;
        Ok(CommandSpec::new(program.as_str(), &self.workdir)
            .args(leading.iter().map(String::as_str))
            .args(args.iter().copied()))
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let spec = self.spec(args)?;
        let output = run_checked(&self.runner, &spec)?;
        Ok(output.stdout_text())
    }
}

impl<R: CommandRunner> Tracker for BeadsTracker<R> {
    #[instrument(skip_all)]
    fn ready(&self) -> Result<Vec<TrackerTask>> {
        let out = self.run(&["ready", "--json"])?;
        let tasks = parse_task_list(&out).context("parse tracker ready output")?;
        debug!(count = tasks.len(), "ready tasks");
        Ok(tasks)
    }

    fn show(&self, id: &str) -> Result<TrackerTask> {
        let out = self.run(&["show", id, "--json"])?;
        parse_single_task(&out).with_context(|| format!("parse tracker show output for {id}"))
    }

    fn update_status(&self, id: &str, status: &str) -> Result<()> {
        debug!(id, status, "updating tracker status");
        self.run(&["update", id, "--status", status])?;
        Ok(())
    }

    fn close(&self, id: &str) -> Result<()> {
        info!(id, "closing task");
        self.run(&["close", id])?;
        Ok(())
    }

    fn create(&self, finding: &Finding) -> Result<String> {
        let priority = finding.priority.to_string();
        let mut args = vec![
            "create",
            finding.title.as_str(),
            "-t",
            issue_type(finding.kind),
            "-p",
            priority.as_str(),
        ];
        if let Some(description) = &finding.description {
            args.push("-d");
            args.push(description);
        }
        args.push("--json");
        let out = self.run(&args)?;
        let created = parse_single_task(&out)
            .with_context(|| format!("parse tracker create output for '{}'", finding.title))?;
        info!(id = %created.id, kind = %finding.kind, "filed finding");
        Ok(created.id)
    }

    fn sync(&self) -> Result<()> {
        self.run(&["sync"])?;
        Ok(())
    }
}

/// Tracker issue type for a finding kind.
pub fn issue_type(kind: FindingKind) -> &'static str {
    match kind {
        FindingKind::Task => "task",
        FindingKind::Bug => "bug",
        FindingKind::Improvement => "feature",
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(TrackerTask),
    Many(Vec<TrackerTask>),
}

fn parse_task_list(out: &str) -> Result<Vec<TrackerTask>> {
    let trimmed = out.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let tasks: Option<Vec<TrackerTask>> = serde_json::from_str(trimmed)?;
    Ok(tasks.unwrap_or_default())
}

fn parse_single_task(out: &str) -> Result<TrackerTask> {
    match serde_json::from_str::<OneOrMany>(out.trim())? {
        OneOrMany::One(task) => Ok(task),
        OneOrMany::Many(tasks) => tasks
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("tracker returned no task")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::process::CommandOutput;
    use crate::test_support::ScriptedRunner;

    fn tracker(runner: &ScriptedRunner) -> BeadsTracker<&ScriptedRunner> {
        BeadsTracker::new(vec!["bd".to_string()], "/work/app", runner)
    }

    #[test]
    fn ready_parses_task_list_ignoring_unknown_fields() {
        let runner = ScriptedRunner::new().respond(
            "ready",
            CommandOutput::ok(
                r#"[{"id":"bd-3","title":"Add login","priority":1,"status":"open","issue_type":"task","dependencies":[]},
                    {"id":"bd-4","title":"Fix logout","priority":2,"status":"open"}]"#,
            ),
        );
        let tasks = tracker(&runner).ready().expect("ready");

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "bd-3");
        assert_eq!(tasks[0].title, "Add login");
        assert_eq!(tasks[0].priority, Some(1));
        assert_eq!(runner.calls()[0].to_string(), "bd ready --json");
    }

    #[test]
    fn ready_tolerates_empty_and_null_output() {
        let runner = ScriptedRunner::new().respond("ready", CommandOutput::ok(""));
        assert!(tracker(&runner).ready().expect("ready").is_empty());

        let runner = ScriptedRunner::new().respond("ready", CommandOutput::ok("null\n"));
        assert!(tracker(&runner).ready().expect("ready").is_empty());
    }

    #[test]
    fn show_accepts_object_or_array() {
        let runner = ScriptedRunner::new().respond(
            "show",
            CommandOutput::ok(r#"[{"id":"bd-9","title":"Nine"}]"#),
        );
        assert_eq!(tracker(&runner).show("bd-9").expect("show").title, "Nine");

        let runner = ScriptedRunner::new()
            .respond("show", CommandOutput::ok(r#"{"id":"bd-9","title":"Nine"}"#));
        assert_eq!(tracker(&runner).show("bd-9").expect("show").id, "bd-9");
    }

    #[test]
    fn create_passes_type_priority_and_description() {
        let runner = ScriptedRunner::new().respond(
            "create",
            CommandOutput::ok(r#"{"id":"bd-20","title":"Cache lookups"}"#),
        );
        let finding = Finding::new(FindingKind::Improvement, "Cache lookups", 3)
            .with_description("hot path in resolver");

        let id = tracker(&runner).create(&finding).expect("create");
        assert_eq!(id, "bd-20");
        assert_eq!(
            runner.calls()[0].args,
            vec![
                "create",
                "Cache lookups",
                "-t",
                "feature",
                "-p",
                "3",
                "-d",
                "hot path in resolver",
                "--json"
            ]
        );
    }

    #[test]
    fn leading_command_arguments_are_preserved() {
        let runner = ScriptedRunner::new();
        let tracker = BeadsTracker::new(
            vec!["bd".to_string(), "--no-daemon".to_string()],
            "/work/app",
            &runner,
        );
        tracker.update_status("bd-1", STATUS_IN_PROGRESS).expect("update");
        tracker.close("bd-1").expect("close");

        let calls: Vec<String> = runner.calls().iter().map(ToString::to_string).collect();
        assert_eq!(
            calls,
            vec![
                "bd --no-daemon update bd-1 --status in_progress",
                "bd --no-daemon close bd-1"
            ]
        );
    }

    #[test]
    fn failing_command_surfaces_stderr() {
        let runner = ScriptedRunner::new().fail("close", 1, "issue bd-1 not found");
        let err = tracker(&runner).close("bd-1").unwrap_err();
        assert!(format!("{err:#}").contains("issue bd-1 not found"));
    }
}
