//! Orchestration of the prep → cook → serve → tidy cycle.
//!
//! Each entry point takes the project's session lock, checks the phase
//! transition against [`crate::core::phase`], then drives git, the tracker and
//! the reviewer. The session file is saved after every step, so an
//! interrupted phase resumes from what was last persisted.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::phase::{PhaseEvent, transition};
use crate::core::session::most_recent;
use crate::core::types::{
    Finding, FindingKind, Phase, ReviewRecord, ReviewVerdict, Session, TaskState,
};
use crate::io::config::{SousConfig, config_path, load_config};
use crate::io::git::{DiffOptions, Git};
use crate::io::process::{CommandRunner, SystemRunner};
use crate::io::review::{ReviewOutcome, ReviewRequest, Reviewer, reviewer_for};
use crate::io::session_store::{SessionStore, StoreError};
use crate::io::tracker::{BeadsTracker, STATUS_IN_PROGRESS, Tracker, TrackerTask};

/// A phase refused to run because a precondition does not hold.
///
/// Raised before the phase mutates anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("blocked while {phase}: {reason}")]
pub struct Blocked {
    pub phase: Phase,
    pub reason: String,
}

fn blocked(phase: Phase, reason: impl Into<String>) -> anyhow::Error {
    Blocked {
        phase,
        reason: reason.into(),
    }
    .into()
}

/// What to run next from `phase`.
fn next_step_hint(phase: Phase) -> &'static str {
    match phase {
        Phase::Idle => "run `sous prep` first",
        Phase::Prepping | Phase::ReadyToWork => "run `sous cook`",
        Phase::Cooking => "run `sous serve` when the work is done",
        Phase::Serving | Phase::Tidying => "run `sous tidy`",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PrepReport {
    pub branch: String,
    /// False when the project has no `origin` to sync with.
    pub synced: bool,
    pub ready: Vec<TrackerTask>,
    /// An unreadable session file was replaced.
    pub replaced_corrupt: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CookReport {
    pub task: TaskState,
    /// The task was already cooking; nothing changed.
    pub resumed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServeReport {
    pub task_id: String,
    pub verdict: ReviewVerdict,
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finding: Option<Finding>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TidyReport {
    /// Tracker ids of the findings filed during this tidy.
    pub filed: Vec<String>,
    pub committed: bool,
    pub head: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed: Option<String>,
    /// Tracker failures after the push; the work itself is done.
    pub warnings: Vec<String>,
}

/// Everything `work` ran, in order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prep: Option<PrepReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cook: Option<CookReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serve: Option<ServeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tidy: Option<TidyReport>,
    pub phase: Phase,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub session_path: PathBuf,
    pub session: Session,
}

/// The phase state machine for one project.
pub struct Workflow<R, T, V> {
    git: Git<R>,
    store: SessionStore,
    tracker: T,
    reviewer: V,
    config: SousConfig,
}

/// A workflow wired to real git, `bd` and the configured reviewer.
pub type ProjectWorkflow = Workflow<SystemRunner, BeadsTracker, Box<dyn Reviewer>>;

/// Load `<project>/.sous/config.toml` and wire the workflow for `project_dir`.
pub fn open(project_dir: &Path) -> Result<ProjectWorkflow> {
    let config = load_config(&config_path(project_dir))?;
    let runner = SystemRunner::new(config.command_timeout(), config.output_limit_bytes);
    let state_dir = config.resolve_state_dir()?;
    let store = SessionStore::for_project(&state_dir, project_dir);
    debug!(session = %store.path().display(), "opening project");

    let git = Git::with_runner(project_dir, runner.clone());
    let tracker = BeadsTracker::new(config.tracker.command.clone(), project_dir, runner.clone());
    let reviewer = reviewer_for(&config.review.command, runner);
    Ok(Workflow::new(git, store, tracker, reviewer, config))
}

impl<R, T, V> Workflow<R, T, V>
where
    R: CommandRunner,
    T: Tracker,
    V: Reviewer,
{
    pub fn new(git: Git<R>, store: SessionStore, tracker: T, reviewer: V, config: SousConfig) -> Self {
        Self {
            git,
            store,
            tracker,
            reviewer,
            config,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn git(&self) -> &Git<R> {
        &self.git
    }

    /// Sync with `origin`, reset the session and list ready work.
    #[instrument(skip_all)]
    pub fn prep(&self) -> Result<PrepReport> {
        let _lock = self.store.lock()?;
        self.prep_locked()
    }

    /// Pick a task (the given id, else the first ready one) and start cooking.
    #[instrument(skip_all, fields(task = task_id.unwrap_or("")))]
    pub fn cook(&self, task_id: Option<&str>) -> Result<CookReport> {
        let _lock = self.store.lock()?;
        self.cook_locked(task_id)
    }

    /// Finish the task, hand the diff to review and record the verdict.
    #[instrument(skip_all)]
    pub fn serve(&self) -> Result<ServeReport> {
        let _lock = self.store.lock()?;
        self.serve_locked()
    }

    /// File findings, commit, push and verify, then close the task.
    #[instrument(skip_all)]
    pub fn tidy(&self) -> Result<TidyReport> {
        let _lock = self.store.lock()?;
        self.tidy_locked()
    }

    /// Advance the cycle as far as it goes without operator work.
    ///
    /// From `Idle` this preps and starts cooking. From `Cooking` it serves and
    /// tidies. From `Serving` or `Tidying` it finishes an interrupted tidy.
    #[instrument(skip_all)]
    pub fn work(&self, task_id: Option<&str>) -> Result<WorkReport> {
        let _lock = self.store.lock()?;
        let phase = self.store.load()?.phase;
        debug!(phase = %phase, "work starting");
        let mut report = WorkReport::default();
        match phase {
            Phase::Idle => {
                report.prep = Some(self.prep_locked()?);
                report.cook = Some(self.cook_locked(task_id)?);
            }
            Phase::Prepping | Phase::ReadyToWork => {
                report.cook = Some(self.cook_locked(task_id)?);
            }
            Phase::Cooking => {
                report.serve = Some(self.serve_locked()?);
                report.tidy = Some(self.tidy_locked()?);
            }
            Phase::Serving | Phase::Tidying => {
                report.tidy = Some(self.tidy_locked()?);
            }
        }
        report.phase = self.store.load()?.phase;
        Ok(report)
    }

    /// Record a finding for the tidy phase.
    pub fn add_finding(&self, finding: Finding) -> Result<Session> {
        let _lock = self.store.lock()?;
        let session = self.store.load()?;
        if session.project_dir.is_empty() {
            return Err(blocked(session.phase, "no session yet; run `sous prep` first"));
        }
        let session = self.store.add_finding(finding)?;
        info!(count = session.findings.len(), "finding recorded");
        Ok(session)
    }

    pub fn status(&self) -> Result<StatusReport> {
        Ok(StatusReport {
            session_path: self.store.path().to_path_buf(),
            session: self.store.load()?,
        })
    }

    /// Delete the session file; works on corrupt state too.
    pub fn reset(&self) -> Result<()> {
        let _lock = self.store.lock()?;
        self.store.clear()?;
        Ok(())
    }

    fn prep_locked(&self) -> Result<PrepReport> {
        let (phase, replaced_corrupt) = match self.store.load() {
            Ok(session) => (session.phase, false),
            Err(StoreError::Corrupt { path, source }) => {
                warn!(path = %path.display(), err = %source, "replacing corrupt session");
                (Phase::Idle, true)
            }
            Err(err) => return Err(err.into()),
        };
        self.advance(phase, PhaseEvent::Prep)?;

        if !self.git.is_repo() {
            return Err(blocked(
                phase,
                format!("{} is not a git repository", self.git.workdir().display()),
            ));
        }
        let branch = self.git.branch()?;
        if branch.is_empty() {
            return Err(blocked(phase, "detached HEAD (check out a branch first)"));
        }

        let synced = self.git.has_remote();
        if synced {
            self.git.fetch().context("prep: fetch")?;
            if self.git.remote_branch_exists(&branch)? {
                self.git.pull().context("prep: pull")?;
            } else {
                debug!(branch = %branch, "branch not on origin yet, skipping pull");
            }
        } else {
            info!("no origin configured, skipping sync");
        }

        let project_dir = self.git.workdir().display().to_string();
        self.store.start_session(&project_dir, &branch)?;
        let ready = self.tracker.ready().context("query ready tasks")?;
        info!(branch = %branch, ready = ready.len(), "prep finished");
        Ok(PrepReport {
            branch,
            synced,
            ready,
            replaced_corrupt,
        })
    }

    fn cook_locked(&self, task_id: Option<&str>) -> Result<CookReport> {
        let mut session = self.store.load()?;
        self.ensure_session_branch(&session)?;
        if session.phase == Phase::Cooking {
            return resume_cooking(&session, task_id);
        }
        if session.phase == Phase::Prepping {
            session = self.select_task(task_id)?;
        }

        let next = self.advance(session.phase, PhaseEvent::StartCooking)?;
        let task = session
            .current_task
            .clone()
            .ok_or_else(|| blocked(session.phase, "no task selected; run `sous prep` again"))?;
        if let Some(id) = task_id
            && id != task.id
        {
            return Err(blocked(
                session.phase,
                format!("task {} is already selected, not {id}", task.id),
            ));
        }
        self.store.set_phase(next)?;
        info!(task = %task.id, "cooking");
        Ok(CookReport {
            task,
            resumed: false,
        })
    }

    fn select_task(&self, task_id: Option<&str>) -> Result<Session> {
        let next = self.advance(Phase::Prepping, PhaseEvent::TaskSelected)?;
        if !self.git.is_clean()? {
            return Err(blocked(
                Phase::Prepping,
                "working tree has uncommitted changes (commit or stash them first)",
            ));
        }
        let task = match task_id {
            Some(id) => self.tracker.show(id).with_context(|| format!("look up task {id}"))?,
            None => self
                .tracker
                .ready()
                .context("query ready tasks")?
                .into_iter()
                .next()
                .ok_or_else(|| blocked(Phase::Prepping, "the tracker has no ready tasks"))?,
        };
        self.store.start_task(&task.id, &task.title)?;
        self.tracker
            .update_status(&task.id, STATUS_IN_PROGRESS)
            .with_context(|| format!("mark {} in progress", task.id))?;
        Ok(self.store.set_phase(next)?)
    }

    fn serve_locked(&self) -> Result<ServeReport> {
        let session = self.store.load()?;
        self.ensure_session_branch(&session)?;
        let next = self.advance(session.phase, PhaseEvent::Serve)?;
        let task = session
            .current_task
            .ok_or_else(|| blocked(session.phase, "no task in flight"))?;

        self.store.complete_task(&task.id)?;
        self.store.set_phase(next)?;

        let diff = self.git.diff(&DiffOptions {
            base: Some("HEAD".to_string()),
            ..DiffOptions::default()
        })?;
        let changed_files = self
            .git
            .status_entries()?
            .into_iter()
            .map(|entry| entry.path)
            .collect();
        let request = ReviewRequest {
            workdir: self.git.workdir().to_path_buf(),
            task_id: task.id.clone(),
            task_title: task.title.clone(),
            diff,
            changed_files,
        };

        let (outcome, review_error) = match self.reviewer.review(&request) {
            Ok(outcome) => (outcome, None),
            Err(err) => {
                let message = format!("{err:#}");
                warn!(err = %message, "review failed, recording as a finding");
                let outcome = ReviewOutcome {
                    verdict: ReviewVerdict::Blocked,
                    notes: vec![format!("review failed: {message}")],
                };
                (outcome, Some(message))
            }
        };

        self.store.record_review(ReviewRecord {
            verdict: outcome.verdict,
            notes: outcome.notes.clone(),
            reviewed_at: Utc::now(),
        })?;
        let finding = review_finding(&task, &outcome, review_error.as_deref());
        if let Some(finding) = &finding {
            self.store.add_finding(finding.clone())?;
        }

        let next = self.advance(next, PhaseEvent::ReviewRecorded)?;
        self.store.set_phase(next)?;
        info!(task = %task.id, verdict = %outcome.verdict, "served");
        Ok(ServeReport {
            task_id: task.id,
            verdict: outcome.verdict,
            notes: outcome.notes,
            review_error,
            finding,
        })
    }

    fn tidy_locked(&self) -> Result<TidyReport> {
        let session = self.store.load()?;
        self.ensure_session_branch(&session)?;
        let phase = self.advance(session.phase, PhaseEvent::BeginTidy)?;
        if !self.git.has_remote() {
            return Err(blocked(
                session.phase,
                "no `origin` remote to push to (add one with `git remote add origin <url>`)",
            ));
        }
        self.store.set_phase(phase)?;

        let mut filed = Vec::with_capacity(session.findings.len());
        for finding in &session.findings {
            let id = self
                .tracker
                .create(finding)
                .with_context(|| format!("file finding '{}'", finding.title))?;
            filed.push(id);
        }
        if !session.findings.is_empty() {
            self.store.clear_findings()?;
        }

        let completed = most_recent(&session).to_string();
        self.git.add_all()?;
        let committed = self
            .git
            .commit_staged(&self.config.commit_message(&completed))?;
        self.git.push().context("tidy: push (phase stays at tidying; retry `sous tidy`)")?;
        self.git.fetch().context("tidy: fetch after push")?;
        if !self.git.is_up_to_date_with_remote()? || self.git.has_unpushed_commits()? {
            bail!("tidy: branch does not match origin after push; retry `sous tidy`");
        }
        let head = self.git.last_commit_sha()?;

        let mut warnings = Vec::new();
        let closed = if completed.is_empty() {
            None
        } else {
            match self.tracker.close(&completed) {
                Ok(()) => Some(completed.clone()),
                Err(err) => {
                    warnings.push(format!("close {completed}: {err:#}"));
                    None
                }
            }
        };
        if let Err(err) = self.tracker.sync() {
            warnings.push(format!("tracker sync: {err:#}"));
        }
        for warning in &warnings {
            warn!(warning = %warning, "tracker update after push failed");
        }

        let next = self.advance(phase, PhaseEvent::Pushed)?;
        self.store.set_phase(next)?;
        info!(head = %head, filed = filed.len(), committed, "tidy finished");
        Ok(TidyReport {
            filed,
            committed,
            head,
            closed,
            warnings,
        })
    }

    /// A session belongs to the branch it was prepped on.
    fn ensure_session_branch(&self, session: &Session) -> Result<()> {
        if session.branch.is_empty() {
            return Ok(());
        }
        let current = self.git.branch()?;
        if current == session.branch {
            return Ok(());
        }
        let head = if current.is_empty() {
            "a detached HEAD".to_string()
        } else {
            format!("branch {current}")
        };
        Err(blocked(
            session.phase,
            format!(
                "session belongs to branch {}, HEAD is on {head} (check out {} or run `sous prep`)",
                session.branch, session.branch
            ),
        ))
    }

    fn advance(&self, from: Phase, event: PhaseEvent) -> Result<Phase> {
        transition(from, event)
            .map_err(|err| blocked(from, format!("{err}; {}", next_step_hint(from))))
    }
}

fn resume_cooking(session: &Session, task_id: Option<&str>) -> Result<CookReport> {
    let task = session
        .current_task
        .clone()
        .ok_or_else(|| anyhow!("session is cooking without a task; run `sous reset`"))?;
    match task_id {
        Some(id) if id != task.id => Err(blocked(
            Phase::Cooking,
            format!("task {} is already cooking (serve it before starting {id})", task.id),
        )),
        _ => Ok(CookReport {
            task,
            resumed: true,
        }),
    }
}

/// Finding recorded for a review that did not come back ready.
fn review_finding(
    task: &TaskState,
    outcome: &ReviewOutcome,
    review_error: Option<&str>,
) -> Option<Finding> {
    let (kind, title, priority) = match (review_error, outcome.verdict) {
        (Some(_), _) => (FindingKind::Bug, format!("Review of {} failed", task.id), 1),
        (None, ReviewVerdict::Ready) => return None,
        (None, ReviewVerdict::NeedsChanges) => (
            FindingKind::Improvement,
            format!("Address review feedback on {}", task.id),
            2,
        ),
        (None, ReviewVerdict::Blocked) => {
            (FindingKind::Bug, format!("Review blocked {}", task.id), 1)
        }
    };
    let finding = Finding::new(kind, title, priority);
    Some(match review_error {
        Some(err) => finding.with_description(err),
        None if outcome.notes.is_empty() => finding,
        None => finding.with_description(outcome.notes.join("\n")),
    })
}
