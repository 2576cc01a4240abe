//! Pure session mutations.
//!
//! The store wraps each of these in a load-mutate-save round trip; keeping the
//! rules here lets them be tested without touching the filesystem.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{Finding, RECENTLY_COMPLETED_CAP, Session, TaskState};

/// A mutation that the session rules refuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionRuleError {
    #[error("task {active} is already in flight (complete or abandon it before starting {requested})")]
    TaskAlreadyActive { active: String, requested: String },
    #[error("cannot complete {requested}: the task in flight is {active}")]
    TaskMismatch { active: String, requested: String },
    #[error("finding title must not be empty")]
    EmptyFindingTitle,
}

/// Build a fresh session, discarding whatever came before.
pub fn fresh_session(project_dir: &str, branch: &str, now: DateTime<Utc>) -> Session {
    Session {
        project_dir: project_dir.to_string(),
        branch: branch.to_string(),
        started_at: now,
        ..Session::default()
    }
}

/// Set the current task.
///
/// Re-starting the task already in flight is a no-op that keeps its original
/// `started_at`. Starting a different task while one is in flight is refused.
pub fn start_task(
    session: &mut Session,
    id: &str,
    title: &str,
    now: DateTime<Utc>,
) -> Result<(), SessionRuleError> {
    if let Some(active) = &session.current_task {
        if active.id == id {
            return Ok(());
        }
        return Err(SessionRuleError::TaskAlreadyActive {
            active: active.id.clone(),
            requested: id.to_string(),
        });
    }
    session.current_task = Some(TaskState {
        id: id.to_string(),
        title: title.to_string(),
        started_at: now,
    });
    Ok(())
}

/// Clear the current task and record `id` as the most recent completion.
///
/// With no task in flight the id is still recorded, which lets an operator
/// close out a task whose session was lost.
pub fn complete_task(session: &mut Session, id: &str) -> Result<(), SessionRuleError> {
    if let Some(active) = &session.current_task
        && active.id != id
    {
        return Err(SessionRuleError::TaskMismatch {
            active: active.id.clone(),
            requested: id.to_string(),
        });
    }
    session.current_task = None;
    push_recent(&mut session.recently_completed, id);
    Ok(())
}

/// Drop the current task without recording it as completed.
pub fn abandon_task(session: &mut Session) -> Option<TaskState> {
    session.current_task.take()
}

pub fn add_finding(session: &mut Session, finding: Finding) -> Result<(), SessionRuleError> {
    if finding.title.trim().is_empty() {
        return Err(SessionRuleError::EmptyFindingTitle);
    }
    session.findings.push(finding);
    Ok(())
}

pub fn clear_findings(session: &mut Session) {
    session.findings.clear();
}

/// Most recently completed task id, or an empty string.
pub fn most_recent(session: &Session) -> &str {
    session
        .recently_completed
        .first()
        .map(String::as_str)
        .unwrap_or("")
}

fn push_recent(recent: &mut Vec<String>, id: &str) {
    recent.insert(0, id.to_string());
    recent.truncate(RECENTLY_COMPLETED_CAP);
}
