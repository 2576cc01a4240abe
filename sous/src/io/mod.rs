//! Side-effecting adapters: files, subprocesses, and external collaborators.

pub mod config;
pub mod git;
pub mod lock;
pub mod process;
pub mod review;
pub mod session_store;
pub mod tracker;
