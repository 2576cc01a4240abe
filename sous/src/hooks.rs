//! Lifecycle hooks for a hosting assistant runtime.
//!
//! The runtime calls `sous hook <name>` around its own events. A blocked
//! outcome exits with [`crate::exit_codes::BLOCKED`] and its message on
//! stderr, which the runtime treats as "refuse this action".

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::types::{Phase, Session};
use crate::io::git::Git;
use crate::io::process::CommandRunner;
use crate::io::session_store::{SessionStore, StoreError};
use crate::report::session_summary;

/// Tools that write to the working tree.
pub const FILE_MUTATING_TOOLS: [&str; 4] = ["Edit", "Write", "MultiEdit", "NotebookEdit"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookOutcome {
    pub hook: &'static str,
    pub blocked: bool,
    pub message: String,
}

impl HookOutcome {
    pub fn allow(hook: &'static str, message: impl Into<String>) -> Self {
        Self {
            hook,
            blocked: false,
            message: message.into(),
        }
    }

    pub fn block(hook: &'static str, message: impl Into<String>) -> Self {
        Self {
            hook,
            blocked: true,
            message: message.into(),
        }
    }
}

pub fn is_file_mutating(tool: Option<&str>) -> bool {
    tool.is_some_and(|tool| FILE_MUTATING_TOOLS.contains(&tool))
}

/// Summarize the session for the start of an assistant session. Never fails.
pub fn session_start(store: &SessionStore) -> HookOutcome {
    let message = match store.load() {
        Ok(session) if session.is_empty() => {
            "no sous session for this project; run `sous prep` to start one".to_string()
        }
        Ok(session) => session_summary(&session),
        Err(err @ StoreError::Corrupt { .. }) => {
            format!("{err} (run `sous reset` to discard it)")
        }
        Err(err) => format!("sous session unavailable: {err}"),
    };
    HookOutcome::allow("session-start", message)
}

/// Refuse file edits unless a task is being cooked.
pub fn pre_tool(store: &SessionStore, tool: Option<&str>) -> HookOutcome {
    const HOOK: &str = "pre-tool";
    if !is_file_mutating(tool) {
        return HookOutcome::allow(HOOK, "");
    }
    let tool = tool.unwrap_or_default();
    match store.load() {
        Ok(Session {
            phase: Phase::Cooking,
            current_task: Some(task),
            ..
        }) => {
            debug!(tool, task = %task.id, "edit allowed");
            HookOutcome::allow(HOOK, "")
        }
        Ok(session) => HookOutcome::block(
            HOOK,
            format!(
                "{tool} is only allowed while cooking a task (phase is {}); run `sous cook` first",
                session.phase
            ),
        ),
        Err(err) => HookOutcome::block(HOOK, format!("{tool} refused: {err}")),
    }
}

/// Report how many files changed during cooking. Never blocks.
pub fn post_tool<R: CommandRunner>(
    store: &SessionStore,
    git: &Git<R>,
    tool: Option<&str>,
) -> HookOutcome {
    const HOOK: &str = "post-tool";
    if !is_file_mutating(tool) {
        return HookOutcome::allow(HOOK, "");
    }
    let task = match store.load() {
        Ok(session) if session.phase == Phase::Cooking => session.current_task,
        _ => None,
    };
    let Some(task) = task else {
        return HookOutcome::allow(HOOK, "");
    };
    match git.status_entries() {
        Ok(entries) => HookOutcome::allow(
            HOOK,
            format!("{} changed file(s) while cooking {}", entries.len(), task.id),
        ),
        Err(err) => {
            warn!(err = %err, "post-tool status failed");
            HookOutcome::allow(HOOK, format!("could not read git status: {err:#}"))
        }
    }
}

/// Refuse to stop while work is unfinished or unpushed.
pub fn stop<R: CommandRunner>(store: &SessionStore, git: &Git<R>) -> Result<HookOutcome> {
    const HOOK: &str = "stop";
    let mut reasons = Vec::new();
    match store.load() {
        Ok(session) if session.phase.is_mid_cycle() => {
            let task = session
                .current_task
                .as_ref()
                .map(|task| format!(" on {}", task.id))
                .unwrap_or_default();
            reasons.push(format!(
                "the session is {}{task}; finish with `sous work`",
                session.phase
            ));
        }
        Ok(_) => {}
        Err(err) => reasons.push(format!("{err} (run `sous reset`)")),
    }

    if git.is_repo() {
        if !git.is_clean()? {
            reasons.push("the working tree has uncommitted changes".to_string());
        }
        if git.has_remote() && git.has_unpushed_commits()? {
            reasons.push("there are commits not pushed to origin".to_string());
        }
    }

    if reasons.is_empty() {
        Ok(HookOutcome::allow(HOOK, ""))
    } else {
        Ok(HookOutcome::block(
            HOOK,
            format!("not done yet: {}", reasons.join("; ")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Finding, FindingKind};
    use crate::test_support::TestRepo;

    fn store_for(repo: &TestRepo) -> SessionStore {
        SessionStore::for_project(&repo.state_dir(), repo.root())
    }

    #[test]
    fn only_file_mutating_tools_are_guarded() {
        assert!(is_file_mutating(Some("Edit")));
        assert!(is_file_mutating(Some("NotebookEdit")));
        assert!(!is_file_mutating(Some("Read")));
        assert!(!is_file_mutating(Some("Bash")));
        assert!(!is_file_mutating(None));
    }

    #[test]
    fn pre_tool_blocks_edits_outside_cooking() {
        let repo = TestRepo::new().expect("repo");
        let store = store_for(&repo);

        assert!(pre_tool(&store, Some("Edit")).blocked);
        assert!(!pre_tool(&store, Some("Read")).blocked);

        store.start_session("/p", "main").expect("start");
        store.start_task("bd-1", "t").expect("task");
        assert!(pre_tool(&store, Some("Write")).blocked, "task picked but not cooking");

        store.set_phase(Phase::Cooking).expect("phase");
        assert!(!pre_tool(&store, Some("Write")).blocked);
    }

    #[test]
    fn post_tool_counts_changes_and_never_blocks() {
        let repo = TestRepo::new().expect("repo");
        let store = store_for(&repo);
        store.start_session("/p", "main").expect("start");
        store.start_task("bd-1", "t").expect("task");
        store.set_phase(Phase::Cooking).expect("phase");
        repo.write_file("a.rs", "a\n").expect("write");
        repo.write_file("README.md", "changed\n").expect("write");

        let outcome = post_tool(&store, &repo.git(), Some("Edit"));
        assert!(!outcome.blocked);
        assert_eq!(outcome.message, "2 changed file(s) while cooking bd-1");
    }

    #[test]
    fn stop_blocks_mid_cycle_and_on_dirty_tree() {
        let repo = TestRepo::with_remote().expect("repo");
        let store = store_for(&repo);
        let git = repo.git();
        assert!(!stop(&store, &git).expect("stop").blocked);

        repo.write_file("wip.txt", "wip\n").expect("write");
        let outcome = stop(&store, &git).expect("stop");
        assert!(outcome.blocked);
        assert!(outcome.message.contains("uncommitted"));

        repo.git_cmd(&["add", "wip.txt"]).expect("add");
        repo.git_cmd(&["commit", "-m", "wip"]).expect("commit");
        let outcome = stop(&store, &git).expect("stop");
        assert!(outcome.message.contains("not pushed"), "{}", outcome.message);

        git.push().expect("push");
        store.start_session("/p", "main").expect("start");
        store.set_phase(Phase::Tidying).expect("phase");
        let outcome = stop(&store, &git).expect("stop");
        assert!(outcome.blocked);
        assert!(outcome.message.contains("tidying"));
    }

    #[test]
    fn session_start_reports_instead_of_failing() {
        let repo = TestRepo::new().expect("repo");
        let store = store_for(&repo);
        assert!(session_start(&store).message.contains("sous prep"));

        store.start_session("/p", "main").expect("start");
        store
            .add_finding(Finding::new(FindingKind::Bug, "leak", 1))
            .expect("finding");
        let outcome = session_start(&store);
        assert!(outcome.message.contains("phase: prepping"));
        assert!(outcome.message.contains("findings: 1"));

        std::fs::write(store.path(), "garbage").expect("corrupt");
        let outcome = session_start(&store);
        assert!(!outcome.blocked);
        assert!(outcome.message.contains("sous reset"));
    }
}
