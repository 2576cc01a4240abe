//! Test-only helpers: throwaway git repositories and scripted collaborators.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::types::{Finding, ReviewVerdict};
use crate::io::git::Git;
use crate::io::process::{CommandOutput, CommandRunner, CommandSpec};
use crate::io::review::{ReviewOutcome, ReviewRequest, Reviewer};
use crate::io::tracker::{Tracker, TrackerTask};

/// A git repository in a temp directory, on branch `main`, with one commit
/// (`README.md` = `hello\n`).
///
/// Layout under the temp dir: `work/` (the checkout), `origin.git/` (bare
/// remote, only with [`TestRepo::with_remote`]) and `state/` (free for a
/// session store).
pub struct TestRepo {
    temp: TempDir,
    root: PathBuf,
    remote: Option<PathBuf>,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let root = temp.path().join("work");
        fs::create_dir_all(&root).context("create work dir")?;
        git_in(&root, &["init", "-b", "main"])?;
        configure_identity(&root)?;
        fs::write(root.join("README.md"), "hello\n").context("write README.md")?;
        git_in(&root, &["add", "README.md"])?;
        git_in(&root, &["commit", "-m", "chore: init"])?;
        Ok(Self {
            temp,
            root,
            remote: None,
        })
    }

    /// Like [`TestRepo::new`], plus a bare `origin` that `main` tracks.
    pub fn with_remote() -> Result<Self> {
        let mut repo = Self::new()?;
        let remote = repo.temp.path().join("origin.git");
        git_in(repo.temp.path(), &["init", "--bare", "-b", "main", "origin.git"])?;
        let url = remote.display().to_string();
        git_in(&repo.root, &["remote", "add", "origin", &url])?;
        git_in(&repo.root, &["push", "-u", "origin", "main"])?;
        repo.remote = Some(remote);
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for session state, outside the working tree.
    pub fn state_dir(&self) -> PathBuf {
        self.temp.path().join("state")
    }

    pub fn git(&self) -> Git {
        Git::new(&self.root)
    }

    pub fn write_file(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn commit_file(&self, rel: &str, contents: &str, message: &str) -> Result<()> {
        self.write_file(rel, contents)?;
        git_in(&self.root, &["add", "--", rel])?;
        git_in(&self.root, &["commit", "-m", message])?;
        Ok(())
    }

    /// Commit `rel` from a second clone and push it, so `origin` moves ahead.
    pub fn push_from_other_clone(&self, rel: &str, contents: &str) -> Result<()> {
        let remote = self.require_remote()?;
        let other = tempfile::tempdir_in(self.temp.path()).context("create clone dir")?;
        let url = remote.display().to_string();
        git_in(other.path(), &["clone", "-b", "main", &url, "clone"])?;
        let clone = other.path().join("clone");
        configure_identity(&clone)?;
        fs::write(clone.join(rel), contents).with_context(|| format!("write {rel} in clone"))?;
        git_in(&clone, &["add", "--", rel])?;
        git_in(&clone, &["commit", "-m", "upstream change"])?;
        git_in(&clone, &["push", "origin", "main"])?;
        Ok(())
    }

    /// Point `origin` at a path that does not exist, so network calls fail.
    pub fn break_remote(&self) -> Result<()> {
        let missing = self.temp.path().join("missing.git").display().to_string();
        git_in(&self.root, &["remote", "set-url", "origin", &missing])?;
        Ok(())
    }

    pub fn restore_remote(&self) -> Result<()> {
        let url = self.require_remote()?.display().to_string();
        git_in(&self.root, &["remote", "set-url", "origin", &url])?;
        Ok(())
    }

    /// Run git in the working tree and return stdout.
    pub fn git_cmd(&self, args: &[&str]) -> Result<String> {
        git_in(&self.root, args)
    }

    /// Subjects of the commits on `origin/main`, newest first.
    pub fn remote_log(&self) -> Result<Vec<String>> {
        let remote = self.require_remote()?;
        let out = git_in(remote, &["log", "--format=%s", "main"])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    fn require_remote(&self) -> Result<&Path> {
        self.remote
            .as_deref()
            .ok_or_else(|| anyhow!("test repo has no remote (use TestRepo::with_remote)"))
    }
}

fn configure_identity(dir: &Path) -> Result<()> {
    git_in(dir, &["config", "user.email", "test@example.com"])?;
    git_in(dir, &["config", "user.name", "test"])?;
    git_in(dir, &["config", "commit.gpgsign", "false"])?;
    Ok(())
}

fn git_in(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// [`CommandRunner`] that answers from a script keyed by subcommand.
///
/// Responses for a subcommand are consumed in order; the last one repeats.
/// Unscripted commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: RefCell<HashMap<String, VecDeque<CommandOutput>>>,
    calls: RefCell<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, subcommand: &str, output: CommandOutput) -> Self {
        self.responses
            .borrow_mut()
            .entry(subcommand.to_string())
            .or_default()
            .push_back(output);
        self
    }

    pub fn fail(self, subcommand: &str, code: i32, stderr: &str) -> Self {
        self.respond(subcommand, CommandOutput::failed(code, stderr))
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(spec.clone());
        let key = spec.subcommand().unwrap_or_default();
        let mut responses = self.responses.borrow_mut();
        let Some(queue) = responses.get_mut(key) else {
            return Ok(CommandOutput::ok(""));
        };
        let output = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(output.unwrap_or_else(|| CommandOutput::ok("")))
    }
}

/// In-memory tracker recording every call.
#[derive(Default)]
pub struct FakeTracker {
    ready: Vec<TrackerTask>,
    known: Vec<TrackerTask>,
    failing: HashSet<&'static str>,
    calls: RefCell<Vec<String>>,
    created: RefCell<Vec<Finding>>,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks returned by `ready`, also resolvable through `show`.
    pub fn with_ready(mut self, tasks: Vec<TrackerTask>) -> Self {
        self.known.extend(tasks.iter().cloned());
        self.ready = tasks;
        self
    }

    /// A task resolvable through `show` but not reported as ready.
    pub fn with_task(mut self, task: TrackerTask) -> Self {
        self.known.push(task);
        self
    }

    /// Make `op` (`ready`, `show`, `update`, `close`, `create`, `sync`) fail.
    pub fn failing(mut self, op: &'static str) -> Self {
        self.failing.insert(op);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn created(&self) -> Vec<Finding> {
        self.created.borrow().clone()
    }

    fn record(&self, op: &'static str, call: String) -> Result<()> {
        self.calls.borrow_mut().push(call);
        if self.failing.contains(op) {
            bail!("bd {op} failed");
        }
        Ok(())
    }
}

impl Tracker for FakeTracker {
    fn ready(&self) -> Result<Vec<TrackerTask>> {
        self.record("ready", "ready".to_string())?;
        Ok(self.ready.clone())
    }

    fn show(&self, id: &str) -> Result<TrackerTask> {
        self.record("show", format!("show {id}"))?;
        self.known
            .iter()
            .find(|task| task.id == id)
            .cloned()
            .ok_or_else(|| anyhow!("no issue found: {id}"))
    }

    fn update_status(&self, id: &str, status: &str) -> Result<()> {
        self.record("update", format!("update {id} {status}"))
    }

    fn close(&self, id: &str) -> Result<()> {
        self.record("close", format!("close {id}"))
    }

    fn create(&self, finding: &Finding) -> Result<String> {
        self.record("create", format!("create {}", finding.title))?;
        let mut created = self.created.borrow_mut();
        created.push(finding.clone());
        Ok(format!("bd-new-{}", created.len()))
    }

    fn sync(&self) -> Result<()> {
        self.record("sync", "sync".to_string())
    }
}

/// Reviewer returning a fixed verdict, or failing.
pub struct FakeReviewer {
    outcome: Option<ReviewOutcome>,
    requests: RefCell<Vec<ReviewRequest>>,
}

impl FakeReviewer {
    pub fn ready() -> Self {
        Self::verdict(ReviewVerdict::Ready, &[])
    }

    pub fn verdict(verdict: ReviewVerdict, notes: &[&str]) -> Self {
        Self {
            outcome: Some(ReviewOutcome {
                verdict,
                notes: notes.iter().map(ToString::to_string).collect(),
            }),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            outcome: None,
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ReviewRequest> {
        self.requests.borrow().clone()
    }
}

impl Reviewer for FakeReviewer {
    fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome> {
        self.requests.borrow_mut().push(request.clone());
        self.outcome
            .clone()
            .ok_or_else(|| anyhow!("reviewer crashed"))
    }
}
