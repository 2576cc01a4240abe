//! Phase state machine.
//!
//! ```text
//! Idle -> Prepping -> ReadyToWork -> Cooking -> Serving -> Tidying -> Idle
//! ```
//!
//! `Prep` is accepted from every phase (an explicit operator restart).
//! `BeginTidy` is accepted from `Tidying` so an interrupted tidy can resume.

use std::fmt;

use thiserror::Error;

use super::types::Phase;

/// Event driving a phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Sync started and the session was reset.
    Prep,
    /// A task was chosen and recorded as the current task.
    TaskSelected,
    /// Operator work on the task begins.
    StartCooking,
    /// Cooking ended; the task is handed to review.
    Serve,
    /// The review verdict was recorded.
    ReviewRecorded,
    /// Filing, commit and push begin (or resume).
    BeginTidy,
    /// Push succeeded and the branch matches the remote.
    Pushed,
}

impl fmt::Display for PhaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhaseEvent::Prep => "prep",
            PhaseEvent::TaskSelected => "task-selected",
            PhaseEvent::StartCooking => "start-cooking",
            PhaseEvent::Serve => "serve",
            PhaseEvent::ReviewRecorded => "review-recorded",
            PhaseEvent::BeginTidy => "begin-tidy",
            PhaseEvent::Pushed => "pushed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{event} is not allowed while {from}")]
pub struct IllegalTransition {
    pub from: Phase,
    pub event: PhaseEvent,
}

/// Apply `event` to `from`, returning the next phase.
pub fn transition(from: Phase, event: PhaseEvent) -> Result<Phase, IllegalTransition> {
    use PhaseEvent as E;

    let next = match (from, event) {
        (_, E::Prep) => Phase::Prepping,
        (Phase::Prepping, E::TaskSelected) => Phase::ReadyToWork,
        (Phase::ReadyToWork, E::StartCooking) => Phase::Cooking,
        (Phase::Cooking, E::Serve) => Phase::Serving,
        (Phase::Serving, E::ReviewRecorded) => Phase::Tidying,
        (Phase::Serving | Phase::Tidying, E::BeginTidy) => Phase::Tidying,
        (Phase::Tidying, E::Pushed) => Phase::Idle,
        _ => return Err(IllegalTransition { from, event }),
    };
    Ok(next)
}
