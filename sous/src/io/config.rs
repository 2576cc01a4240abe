//! Project configuration stored under `.sous/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable overriding where session state lives.
pub const STATE_DIR_ENV: &str = "SOUS_STATE_DIR";

/// Placeholder replaced by the completed task id in `tidy.commit_message`.
pub const TASK_PLACEHOLDER: &str = "{task}";

/// Project configuration (TOML).
///
/// Missing fields default to values that work with a stock `bd` install and
/// no reviewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SousConfig {
    /// Directory holding per-project session files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// Wall-clock limit for every external command, in seconds.
    pub command_timeout_secs: u64,

    /// Captured stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,

    pub tracker: TrackerConfig,
    pub review: ReviewConfig,
    pub tidy: TidyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Issue tracker executable and leading arguments (e.g. `["bd"]`).
    pub command: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            command: vec!["bd".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewConfig {
    /// Review command; receives the diff on stdin. Empty skips review.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TidyConfig {
    /// Message for the tidy commit; `{task}` becomes the completed task id.
    pub commit_message: String,
}

impl Default for TidyConfig {
    fn default() -> Self {
        Self {
            commit_message: format!("chore: tidy {TASK_PLACEHOLDER}"),
        }
    }
}

impl Default for SousConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            command_timeout_secs: 300,
            output_limit_bytes: 1_000_000,
            tracker: TrackerConfig::default(),
            review: ReviewConfig::default(),
            tidy: TidyConfig::default(),
        }
    }
}

impl SousConfig {
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.tracker.command.is_empty() || self.tracker.command[0].trim().is_empty() {
            return Err(anyhow!("tracker.command must be a non-empty array"));
        }
        if self
            .review
            .command
            .first()
            .is_some_and(|program| program.trim().is_empty())
        {
            return Err(anyhow!("review.command must start with a program"));
        }
        if self.tidy.commit_message.trim().is_empty() {
            return Err(anyhow!("tidy.commit_message must not be empty"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Commit message for the tidy phase.
    pub fn commit_message(&self, task: &str) -> String {
        let task = if task.is_empty() { "session" } else { task };
        self.tidy.commit_message.replace(TASK_PLACEHOLDER, task)
    }

    /// Resolve the state directory: config, then `$SOUS_STATE_DIR`, then the
    /// platform data directory.
    pub fn resolve_state_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.state_dir {
            return Ok(dir.clone());
        }
        if let Some(dir) = std::env::var_os(STATE_DIR_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        dirs::data_dir()
            .map(|dir| dir.join("sous"))
            .ok_or_else(|| anyhow!("cannot determine a data directory (set {STATE_DIR_ENV})"))
    }
}

/// Config path for a project root.
pub fn config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".sous").join("config.toml")
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SousConfig::default()`.
pub fn load_config(path: &Path) -> Result<SousConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        let cfg = SousConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SousConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SousConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
