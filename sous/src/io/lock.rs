//! Advisory lock around a session's load-mutate-save cycle.
//!
//! The lock is a file created with `create_new`, holding the owner's pid. It
//! is removed when the guard drops, on every exit path. A killed owner leaves
//! the file behind; the next caller takes it over once the recorded pid is no
//! longer running.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::io::session_store::StoreError;

/// Held for the duration of one phase.
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    pub fn acquire(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Unavailable {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut file = match create_lock_file(path)? {
            Some(file) => file,
            None => {
                let pid = holder_pid(path);
                match pid {
                    Some(pid) if !pid_alive(pid) => {
                        warn!(path = %path.display(), pid, "taking over lock left by a dead process");
                        match fs::remove_file(path) {
                            Ok(()) => {}
                            Err(err) if err.kind() == ErrorKind::NotFound => {}
                            Err(source) => {
                                return Err(StoreError::Unavailable {
                                    path: path.to_path_buf(),
                                    source,
                                });
                            }
                        }
                        create_lock_file(path)?.ok_or_else(|| locked(path))?
                    }
                    _ => return Err(locked(path)),
                }
            }
        };
        let lock = Self {
            path: path.to_path_buf(),
        };
        writeln!(file, "{}", std::process::id()).map_err(|source| StoreError::Unavailable {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "session lock acquired");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `None` when another process already holds the lock file.
fn create_lock_file(path: &Path) -> Result<Option<File>, StoreError> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(source) => Err(StoreError::Unavailable {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn holder_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|pid| *pid > 0)
}

fn locked(path: &Path) -> StoreError {
    let holder = holder_pid(path).map_or_else(|| "an unknown process".to_string(), |pid| format!("pid {pid}"));
    warn!(path = %path.display(), holder = %holder, "session is locked");
    StoreError::Locked {
        path: path.to_path_buf(),
        holder,
    }
}

#[cfg(unix)]
fn pid_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // EPERM means the process exists under another user.
    !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}

#[cfg(not(unix))]
fn pid_alive(_pid: i32) -> bool {
    true
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "session lock released"),
            Err(err) => warn!(path = %self.path.display(), err = %err, "failed to release session lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_until_release() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("sessions").join("abc.lock");

        let first = SessionLock::acquire(&path).expect("first lock");
        let err = SessionLock::acquire(&path).unwrap_err();
        match err {
            StoreError::Locked { path: locked, holder } => {
                assert_eq!(locked, path);
                assert_eq!(holder, format!("pid {}", std::process::id()));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        drop(first);
        assert!(!path.exists());
        let _again = SessionLock::acquire(&path).expect("lock after release");
    }

    #[test]
    fn lock_of_dead_process_is_taken_over() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("stale.lock");
        fs::write(&path, format!("{}\n", i32::MAX - 1)).expect("seed lock");

        let lock = SessionLock::acquire(&path).expect("take over stale lock");
        let holder = fs::read_to_string(lock.path()).expect("read lock");
        assert_eq!(holder.trim(), std::process::id().to_string());
    }

    #[test]
    fn unreadable_holder_is_treated_as_live() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("odd.lock");
        fs::write(&path, "").expect("seed lock");

        match SessionLock::acquire(&path).unwrap_err() {
            StoreError::Locked { holder, .. } => assert_eq!(holder, "an unknown process"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(path.exists());
    }

    #[test]
    fn lock_is_released_when_caller_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("p.lock");

        let failing = || -> Result<(), StoreError> {
            let _lock = SessionLock::acquire(&path)?;
            Err(StoreError::Locked {
                path: path.clone(),
                holder: "test".to_string(),
            })
        };
        assert!(failing().is_err());
        assert!(!path.exists());
    }
}
