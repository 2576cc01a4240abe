//! Diagnostic tracing on stderr.
//!
//! Reports printed by commands go to stdout through [`crate::report`]; this
//! module only configures `tracing` output.

use std::io::IsTerminal;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Verbosity selected on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Verbosity::Verbose,
            (false, true) => Verbosity::Quiet,
            (false, false) => Verbosity::Normal,
        }
    }

    /// Filter used when `RUST_LOG` is unset.
    pub fn default_directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "debug",
        }
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over the verbosity flags. Output: stderr, compact format.
///
/// ```bash
/// RUST_LOG=sous=trace sous tidy
/// ```
pub fn init(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_directive()));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .compact(),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_to_directives() {
        assert_eq!(Verbosity::from_flags(false, false).default_directive(), "warn");
        assert_eq!(Verbosity::from_flags(true, false).default_directive(), "debug");
        assert_eq!(Verbosity::from_flags(false, true).default_directive(), "error");
    }
}
