//! Guarded prep → cook → serve → tidy workflow for one project checkout.
//!
//! The crate keeps a durable per-project session (phase, current task,
//! findings) and gates phase transitions on repository state: a clean tree
//! before cooking, and a pushed branch matching `origin` before a cycle ends.
//!
//! - **[`core`]**: Pure session rules and the phase transition table. No I/O.
//! - **[`io`]**: Side effects (session file, lock, git, tracker, reviewer,
//!   subprocesses), each behind a seam that tests can replace.
//!
//! [`workflow`] drives a cycle from `core` decisions and `io` calls; [`hooks`]
//! exposes the same guardrails to a hosting assistant runtime.

pub mod core;
pub mod exit_codes;
pub mod hooks;
pub mod io;
pub mod logging;
pub mod report;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
