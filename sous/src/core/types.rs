//! Shared types for the session record.
//!
//! These types define the on-disk contract of the session file. Field names
//! and enum spellings are part of that contract and must remain stable.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of entries kept in [`Session::recently_completed`].
pub const RECENTLY_COMPLETED_CAP: usize = 5;

/// Workflow phase persisted with the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Prepping,
    ReadyToWork,
    Cooking,
    Serving,
    Tidying,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Prepping => "prepping",
            Phase::ReadyToWork => "ready_to_work",
            Phase::Cooking => "cooking",
            Phase::Serving => "serving",
            Phase::Tidying => "tidying",
        }
    }

    /// True while a task cycle is underway and work may be unpushed.
    pub fn is_mid_cycle(self) -> bool {
        matches!(self, Phase::Cooking | Phase::Serving | Phase::Tidying)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The task currently owning the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub id: String,
    pub title: String,
    pub started_at: DateTime<Utc>,
}

/// Kind of follow-up work discovered mid-task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    Task,
    Bug,
    Improvement,
}

impl FindingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FindingKind::Task => "task",
            FindingKind::Bug => "bug",
            FindingKind::Improvement => "improvement",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Follow-up item deferred to the tidy phase for filing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub kind: FindingKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: u8,
}

impl Finding {
    pub fn new(kind: FindingKind, title: impl Into<String>, priority: u8) -> Self {
        Self {
            kind,
            title: title.into(),
            description: None,
            priority,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Verdict of the external review collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Ready,
    NeedsChanges,
    Blocked,
}

impl ReviewVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewVerdict::Ready => "ready",
            ReviewVerdict::NeedsChanges => "needs_changes",
            ReviewVerdict::Blocked => "blocked",
        }
    }
}

impl fmt::Display for ReviewVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded outcome of the last serve phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub verdict: ReviewVerdict,
    #[serde(default)]
    pub notes: Vec<String>,
    pub reviewed_at: DateTime<Utc>,
}

/// Persisted session for one project root.
///
/// `Default` is the zero-value session returned when no file exists yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub project_dir: String,
    pub branch: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<TaskState>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub recently_completed: Vec<String>,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review: Option<ReviewRecord>,
}

impl Session {
    /// True if this is the zero-value session (nothing has been started).
    pub fn is_empty(&self) -> bool {
        self.project_dir.is_empty() && self.current_task.is_none() && self.findings.is_empty()
    }
}
