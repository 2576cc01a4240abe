//! Stable exit codes for `sous` commands.

use crate::hooks::HookOutcome;
use crate::workflow::Blocked;

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed: bad flags, config, state, or a failing subprocess.
pub const ERROR: i32 = 1;
/// A guardrail refused the request (phase precondition or hook).
pub const BLOCKED: i32 = 2;

/// Exit code for an error that reached `main`.
pub fn for_error(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<Blocked>().is_some() {
        BLOCKED
    } else {
        ERROR
    }
}

pub fn for_hook(outcome: &HookOutcome) -> i32 {
    if outcome.blocked { BLOCKED } else { OK }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Phase;
    use anyhow::{Context, anyhow};

    #[test]
    fn blocked_maps_to_blocked_code_even_with_context() {
        let err: anyhow::Error = Blocked {
            phase: Phase::Idle,
            reason: "run `sous prep` first".to_string(),
        }
        .into();
        assert_eq!(for_error(&err), BLOCKED);

        let wrapped = Err::<(), _>(err).context("cook").unwrap_err();
        assert_eq!(for_error(&wrapped), BLOCKED);
    }

    #[test]
    fn other_errors_map_to_error_code() {
        assert_eq!(for_error(&anyhow!("git push failed")), ERROR);
    }

    #[test]
    fn hook_outcome_codes() {
        assert_eq!(for_hook(&HookOutcome::allow("stop", "")), OK);
        assert_eq!(for_hook(&HookOutcome::block("stop", "dirty")), BLOCKED);
    }
}
