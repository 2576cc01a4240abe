//! Durable session record, one JSON file per project.
//!
//! Every mutator is a load-mutate-save round trip. Nothing is cached between
//! calls: the file on disk is the only authority, so each CLI invocation sees
//! what the previous one saved.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::session::{self, SessionRuleError};
use crate::core::types::{Finding, Phase, ReviewRecord, Session, TaskState};
use crate::io::lock::SessionLock;

/// Failures of the session store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The file could not be read or written (permissions, disk, directory).
    #[error("session storage unavailable at {}", .path.display())]
    Unavailable { path: PathBuf, source: io::Error },
    /// The file exists but does not parse.
    #[error("corrupt session state at {}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// Another invocation holds the session lock.
    #[error("session lock {} is held by {holder} (delete it if that process is gone)", .path.display())]
    Locked { path: PathBuf, holder: String },
    #[error(transparent)]
    Rule(#[from] SessionRuleError),
}

/// Stable key for a project root: the first 16 hex chars of its SHA-256.
///
/// The root is canonicalized when possible so that different spellings of the
/// same directory share a session.
pub fn project_key(project_dir: &Path) -> String {
    let canonical = project_dir
        .canonicalize()
        .unwrap_or_else(|_| project_dir.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// Session file storage.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for `project_dir` under `<state_dir>/sessions/<key>.json`.
    pub fn for_project(state_dir: &Path, project_dir: &Path) -> Self {
        let key = project_key(project_dir);
        Self::new(state_dir.join("sessions").join(format!("{key}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// Take the advisory lock for this session; released when the guard drops.
    pub fn lock(&self) -> Result<SessionLock, StoreError> {
        SessionLock::acquire(&self.lock_path())
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the session, or the zero-value session if no file exists yet.
    pub fn load(&self) -> Result<Session, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no session file, using empty session");
                return Ok(Session::default());
            }
            Err(source) => {
                return Err(StoreError::Unavailable {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let session: Session =
            serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = %self.path.display(), phase = %session.phase, "session loaded");
        Ok(session)
    }

    /// Atomically write the session (temp file + rename).
    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        debug!(path = %self.path.display(), phase = %session.phase, "writing session");
        let mut buf = serde_json::to_string_pretty(session).map_err(|source| {
            StoreError::Unavailable {
                path: self.path.clone(),
                source: io::Error::other(source),
            }
        })?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }

    /// Remove the session file; a missing file is not an error.
    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "session cleared");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Unavailable {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Replace any existing session with a fresh one in the prepping phase.
    pub fn start_session(&self, project_dir: &str, branch: &str) -> Result<Session, StoreError> {
        let mut fresh = session::fresh_session(project_dir, branch, Utc::now());
        fresh.phase = Phase::Prepping;
        self.save(&fresh)?;
        info!(project_dir, branch, "session started");
        Ok(fresh)
    }

    pub fn start_task(&self, id: &str, title: &str) -> Result<Session, StoreError> {
        self.update(|s| Ok(session::start_task(s, id, title, Utc::now())?))
    }

    pub fn complete_task(&self, id: &str) -> Result<Session, StoreError> {
        self.update(|s| Ok(session::complete_task(s, id)?))
    }

    /// Drop the current task without recording it; returns what was dropped.
    pub fn abandon_task(&self) -> Result<Option<TaskState>, StoreError> {
        let mut current = self.load()?;
        let abandoned = session::abandon_task(&mut current);
        self.save(&current)?;
        Ok(abandoned)
    }

    pub fn add_finding(&self, finding: Finding) -> Result<Session, StoreError> {
        self.update(|s| Ok(session::add_finding(s, finding)?))
    }

    pub fn clear_findings(&self) -> Result<Session, StoreError> {
        self.update(|s| {
            session::clear_findings(s);
            Ok(())
        })
    }

    /// Most recently completed task id, or an empty string.
    pub fn get_recently_completed(&self) -> Result<String, StoreError> {
        Ok(session::most_recent(&self.load()?).to_string())
    }

    pub fn set_phase(&self, phase: Phase) -> Result<Session, StoreError> {
        self.update(|s| {
            s.phase = phase;
            Ok(())
        })
    }

    pub fn record_review(&self, review: ReviewRecord) -> Result<Session, StoreError> {
        self.update(|s| {
            s.last_review = Some(review);
            Ok(())
        })
    }

    fn update(
        &self,
        mutate: impl FnOnce(&mut Session) -> Result<(), StoreError>,
    ) -> Result<Session, StoreError> {
        let mut current = self.load()?;
        mutate(&mut current)?;
        self.save(&current)?;
        Ok(current)
    }
}

fn unavailable(path: &Path) -> impl FnOnce(io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Unavailable { path, source }
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| StoreError::Unavailable {
        path: path.to_path_buf(),
        source: io::Error::new(ErrorKind::InvalidInput, "session path has no parent"),
    })?;
    fs::create_dir_all(parent).map_err(unavailable(parent))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents).map_err(unavailable(&tmp_path))?;
    fs::rename(&tmp_path, path).map_err(unavailable(path))?;
    Ok(())
}
