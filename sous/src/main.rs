//! `sous`: prep, cook, serve and tidy one task at a time.
//!
//! Session state lives outside the project (see `SOUS_STATE_DIR`); per-project
//! settings live in `.sous/config.toml`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand, ValueEnum};
use sous::core::types::{Finding, FindingKind};
use sous::exit_codes;
use sous::hooks::{self, HookOutcome};
use sous::io::session_store::StoreError;
use sous::logging::{self, Verbosity};
use sous::report::{FindingReport, Output, ResetReport};
use sous::workflow;

#[derive(Parser)]
#[command(
    name = "sous",
    version,
    about = "Guarded prep → cook → serve → tidy workflow"
)]
struct Cli {
    /// Debug-level diagnostics on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Only errors; no report text.
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Print reports as JSON.
    #[arg(long, global = true)]
    json: bool,
    /// Project root (defaults to the current directory).
    #[arg(long, global = true, value_name = "DIR")]
    project: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync with origin, start a fresh session and list ready tasks.
    Prep,
    /// Pick a task (the given id, else the first ready one) and start cooking.
    Cook { task_id: Option<String> },
    /// Finish the current task and record the review verdict.
    Serve,
    /// File findings, commit, push and close the task.
    Tidy,
    /// Advance the cycle as far as possible (also resumes an interrupted tidy).
    Work { task_id: Option<String> },
    /// Lifecycle hooks for an assistant runtime.
    Hook {
        #[command(subcommand)]
        hook: HookCommand,
    },
    /// Record a finding to file at tidy.
    Find {
        #[arg(value_enum)]
        kind: KindArg,
        title: String,
        #[arg(short, long)]
        description: Option<String>,
        /// Tracker priority, 0 (highest) to 4.
        #[arg(short, long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=4))]
        priority: u8,
    },
    /// Show the current session.
    Status,
    /// Delete the session (including corrupt state).
    Reset,
}

#[derive(Subcommand)]
enum HookCommand {
    SessionStart,
    PreTool { tool: Option<String> },
    PostTool { tool: Option<String> },
    Stop,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Task,
    Bug,
    Improvement,
}

impl From<KindArg> for FindingKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Task => FindingKind::Task,
            KindArg::Bug => FindingKind::Bug,
            KindArg::Improvement => FindingKind::Improvement,
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit_codes::OK,
                _ => exit_codes::ERROR,
            };
            std::process::exit(code);
        }
    };
    if cli.verbose && cli.quiet {
        eprintln!("error: --verbose and --quiet are mutually exclusive");
        std::process::exit(exit_codes::ERROR);
    }
    logging::init(Verbosity::from_flags(cli.verbose, cli.quiet));

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(StoreError::Corrupt { .. }) = err.downcast_ref::<StoreError>() {
                eprintln!("hint: run `sous reset` to discard the corrupt session");
            }
            exit_codes::for_error(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let out = Output {
        json: cli.json,
        quiet: cli.quiet,
    };
    let project = match cli.project {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolve current directory")?,
    };

    let open = || workflow::open(&project);
    match cli.command {
        Command::Prep => out.emit(&open()?.prep()?)?,
        Command::Cook { task_id } => out.emit(&open()?.cook(task_id.as_deref())?)?,
        Command::Serve => out.emit(&open()?.serve()?)?,
        Command::Tidy => out.emit(&open()?.tidy()?)?,
        Command::Work { task_id } => out.emit(&open()?.work(task_id.as_deref())?)?,
        Command::Hook { hook } => return run_hook(&hook, &project, out),
        Command::Find {
            kind,
            title,
            description,
            priority,
        } => {
            let mut finding = Finding::new(kind.into(), title, priority);
            if let Some(description) = description {
                finding = finding.with_description(description);
            }
            let session = open()?.add_finding(finding.clone())?;
            out.emit(&FindingReport {
                recorded: finding,
                pending: session.findings.len(),
            })?;
        }
        Command::Status => out.emit(&open()?.status()?)?,
        Command::Reset => {
            open()?.reset()?;
            out.emit(&ResetReport { cleared: true })?;
        }
    }
    Ok(exit_codes::OK)
}

fn run_hook(hook: &HookCommand, project: &Path, out: Output) -> Result<i32> {
    let opened = workflow::open(project);
    let outcome = match (hook, opened) {
        (HookCommand::SessionStart, Ok(flow)) => hooks::session_start(flow.store()),
        (HookCommand::SessionStart, Err(err)) => {
            HookOutcome::allow("session-start", format!("sous unavailable: {err:#}"))
        }
        (_, Err(err)) => return Err(err),
        (HookCommand::PreTool { tool }, Ok(flow)) => hooks::pre_tool(flow.store(), tool.as_deref()),
        (HookCommand::PostTool { tool }, Ok(flow)) => {
            hooks::post_tool(flow.store(), flow.git(), tool.as_deref())
        }
        (HookCommand::Stop, Ok(flow)) => hooks::stop(flow.store(), flow.git())?,
    };
    if outcome.blocked {
        eprintln!("{}", outcome.message);
        if out.json {
            out.emit(&outcome)?;
        }
    } else {
        out.emit(&outcome)?;
    }
    Ok(exit_codes::for_hook(&outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cook_with_task() {
        let cli = Cli::parse_from(["sous", "cook", "bd-4"]);
        assert!(matches!(cli.command, Command::Cook { task_id: Some(ref id) } if id == "bd-4"));
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::parse_from(["sous", "status", "--json", "-v", "--project", "/tmp/p"]);
        assert!(cli.json);
        assert!(cli.verbose);
        assert_eq!(cli.project, Some(PathBuf::from("/tmp/p")));
    }

    #[test]
    fn parse_hook_pre_tool() {
        let cli = Cli::parse_from(["sous", "hook", "pre-tool", "Edit"]);
        assert!(matches!(
            cli.command,
            Command::Hook {
                hook: HookCommand::PreTool { tool: Some(ref t) }
            } if t == "Edit"
        ));
    }

    #[test]
    fn parse_find_defaults_priority() {
        let cli = Cli::parse_from(["sous", "find", "bug", "leak in parser", "-d", "see #12"]);
        match cli.command {
            Command::Find {
                kind,
                title,
                description,
                priority,
            } => {
                assert!(matches!(kind, KindArg::Bug));
                assert_eq!(title, "leak in parser");
                assert_eq!(description.as_deref(), Some("see #12"));
                assert_eq!(priority, 2);
            }
            _ => panic!("expected find"),
        }
    }

    #[test]
    fn find_rejects_out_of_range_priority() {
        assert!(Cli::try_parse_from(["sous", "find", "task", "x", "-p", "9"]).is_err());
    }

    #[test]
    fn verbose_and_quiet_both_parse_for_manual_check() {
        let cli = Cli::parse_from(["sous", "-v", "-q", "status"]);
        assert!(cli.verbose && cli.quiet);
    }
}
