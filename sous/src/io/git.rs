//! Git adapter for the workflow.
//!
//! Phase transitions are gated on repository state (clean tree, branch in
//! sync with `origin`), so we keep a small, explicit wrapper around `git`
//! subprocess calls. Each method issues its commands through a
//! [`CommandRunner`] against one fixed working directory.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::{CommandOutput, CommandRunner, CommandSpec, SystemRunner, dir_name, run_checked};

/// The only remote the workflow talks to.
pub const REMOTE: &str = "origin";

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Parameters for [`Git::diff`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Compare the index instead of the working tree.
    pub staged: bool,
    /// Only list file names.
    pub name_only: bool,
    /// Commit to compare against (e.g. `HEAD`, `origin/main`).
    pub base: Option<String>,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git<R = SystemRunner> {
    workdir: PathBuf,
    runner: R,
}

impl Git<SystemRunner> {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self::with_runner(workdir, SystemRunner::default())
    }
}

impl<R: CommandRunner> Git<R> {
    pub fn with_runner(workdir: impl Into<PathBuf>, runner: R) -> Self {
        Self {
            workdir: workdir.into(),
            runner,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True if a repository root is resolvable from the working directory.
    ///
    /// `.git` may be a directory or, for linked worktrees, a file; when neither
    /// is present we fall back to asking git.
    pub fn is_repo(&self) -> bool {
        if self.workdir.join(".git").exists() {
            return true;
        }
        match self.run(&["rev-parse", "--show-toplevel"]) {
            Ok(out) => out.success(),
            Err(err) => {
                warn!(err = %err, "git rev-parse failed to run");
                false
            }
        }
    }

    #[instrument(skip_all)]
    pub fn fetch(&self) -> Result<()> {
        debug!("fetching from {REMOTE}");
        self.run_checked(&["fetch", REMOTE])?;
        Ok(())
    }

    /// Pull the current branch from `origin` with rebase.
    #[instrument(skip_all)]
    pub fn pull(&self) -> Result<()> {
        let branch = self.require_branch()?;
        debug!(branch = %branch, "pulling with rebase");
        self.run_checked(&["pull", "--rebase", REMOTE, &branch])?;
        Ok(())
    }

    /// Fetch, then pull. Stops at the first failure.
    pub fn fetch_and_pull(&self) -> Result<()> {
        self.fetch()?;
        self.pull()
    }

    /// Push the current branch to `origin`, setting it as upstream.
    #[instrument(skip_all)]
    pub fn push(&self) -> Result<()> {
        debug!("pushing HEAD to {REMOTE}");
        self.run_checked(&["push", "-u", REMOTE, "HEAD"])?;
        Ok(())
    }

    /// Current branch name; empty string on a detached HEAD.
    pub fn branch(&self) -> Result<String> {
        let out = self.run_capture(&["branch", "--show-current"])?;
        let name = out.trim().to_string();
        if name.is_empty() {
            warn!("detached HEAD detected");
        }
        Ok(name)
    }

    /// Raw `git status --porcelain` output (including untracked files).
    pub fn status(&self) -> Result<String> {
        self.run_capture(&["status", "--porcelain=v1", "-uall"])
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_entries(&self) -> Result<Vec<StatusEntry>> {
        let out = self.status()?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// True iff porcelain status output is empty.
    pub fn is_clean(&self) -> Result<bool> {
        let clean = self.status()?.trim().is_empty();
        debug!(clean, "worktree status");
        Ok(clean)
    }

    pub fn diff(&self, options: &DiffOptions) -> Result<String> {
        let mut args = vec!["diff"];
        if options.staged {
            args.push("--cached");
        }
        if options.name_only {
            args.push("--name-only");
        }
        if let Some(base) = &options.base {
            args.push(base);
        }
        self.run_capture(&args)
    }

    /// Tracked files with unstaged changes.
    pub fn changed_files(&self) -> Result<Vec<String>> {
        let out = self.diff(&DiffOptions {
            name_only: true,
            ..DiffOptions::default()
        })?;
        Ok(split_lines(&out))
    }

    /// Files staged for the next commit.
    pub fn staged_files(&self) -> Result<Vec<String>> {
        let out = self.diff(&DiffOptions {
            staged: true,
            name_only: true,
            base: None,
        })?;
        Ok(split_lines(&out))
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    pub fn add(&self, files: &[&str]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend_from_slice(files);
        self.run_checked(&args)?;
        Ok(())
    }

    #[instrument(skip_all)]
    pub fn commit(&self, message: &str) -> Result<()> {
        debug!("committing");
        self.run_checked(&["commit", "-m", message])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        Ok(!self.staged_files()?.is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        self.commit(message)?;
        Ok(true)
    }

    /// True if `refs/remotes/origin/<branch>` exists locally.
    pub fn remote_branch_exists(&self, branch: &str) -> Result<bool> {
        let reference = format!("refs/remotes/{REMOTE}/{branch}");
        let out = self.run(&["rev-parse", "--verify", "--quiet", &reference])?;
        Ok(out.success())
    }

    /// Compare the local tip with `origin/<branch>`.
    ///
    /// A branch that does not exist on the remote is vacuously up to date.
    pub fn is_up_to_date_with_remote(&self) -> Result<bool> {
        let branch = self.branch()?;
        if branch.is_empty() || !self.remote_branch_exists(&branch)? {
            debug!(branch = %branch, "no remote branch to compare against");
            return Ok(true);
        }
        let local = self.last_commit_sha()?;
        let remote = self.run_capture(&["rev-parse", &format!("{REMOTE}/{branch}")])?;
        Ok(local == remote.trim())
    }

    /// Upstream of the current branch (e.g. `origin/main`), if configured.
    pub fn upstream(&self) -> Result<Option<String>> {
        let out = self.run(&["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{upstream}"])?;
        if !out.success() {
            return Ok(None);
        }
        let name = out.stdout_text().trim().to_string();
        Ok((!name.is_empty()).then_some(name))
    }

    /// Commits on HEAD that the upstream does not have; `None` without upstream.
    pub fn ahead_count(&self) -> Result<Option<u32>> {
        if self.upstream()?.is_none() {
            return Ok(None);
        }
        let out = self.run_capture(&["rev-list", "--count", "@{upstream}..HEAD"])?;
        let count = out
            .trim()
            .parse::<u32>()
            .map_err(|err| anyhow!("parse ahead count '{}': {err}", out.trim()))?;
        Ok(Some(count))
    }

    /// True without an upstream (nothing was pushed) or when ahead of it.
    pub fn has_unpushed_commits(&self) -> Result<bool> {
        Ok(self.ahead_count()?.is_none_or(|ahead| ahead > 0))
    }

    pub fn last_commit_sha(&self) -> Result<String> {
        Ok(self.run_capture(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    pub fn remote_url(&self) -> Result<String> {
        Ok(self
            .run_capture(&["remote", "get-url", REMOTE])?
            .trim()
            .to_string())
    }

    pub fn has_remote(&self) -> bool {
        self.remote_url().is_ok()
    }

    /// Basename of the working directory.
    pub fn project_name(&self) -> String {
        dir_name(&self.workdir)
    }

    fn require_branch(&self) -> Result<String> {
        let branch = self.branch()?;
        if branch.is_empty() {
            return Err(anyhow!("detached HEAD (check out a branch first)"));
        }
        Ok(branch)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        Ok(self.run_checked(args)?.stdout_text())
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        run_checked(&self.runner, &self.spec(args))
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        self.runner.run(&self.spec(args))
    }

    fn spec(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new("git", &self.workdir).args(args.iter().copied())
    }
}

/// Split name-only output into paths; empty output yields an empty list.
fn split_lines(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
