//! Single-writer exclusion per dataset.
//!
//! The lock file holds the owner's PID. A lock whose owner is no longer
//! running (killed, or aborted without unwinding) is stale and is taken over
//! by the next `acquire`.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::error::{HarvestError, PersistenceError};

/// Who holds `<output>.lock`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockHolder {
    Running(u32),
    /// Owner is gone; the next run takes the lock over
    Stale(u32),
    /// Lock file without a readable PID
    Unknown,
}

impl std::fmt::Display for LockHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running(pid) => write!(f, "held by pid {pid}"),
            Self::Stale(pid) => write!(f, "stale (pid {pid} is not running)"),
            Self::Unknown => f.write_str("held (no pid recorded)"),
        }
    }
}

fn process_running(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

/// `<output>.lock`, held for the lifetime of a harvest or compaction
#[derive(Debug)]
pub struct DatasetLock {
    path: PathBuf,
}

impl DatasetLock {
    pub fn lock_path(output_path: &Path) -> PathBuf {
        let mut name = output_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Current holder of the lock on `output_path`, `None` when it is free
    pub fn holder(output_path: &Path) -> Option<LockHolder> {
        let content = std::fs::read_to_string(Self::lock_path(output_path)).ok()?;
        Some(match content.trim().parse::<u32>() {
            Ok(pid) if process_running(pid) => LockHolder::Running(pid),
            Ok(pid) => LockHolder::Stale(pid),
            Err(_) => LockHolder::Unknown,
        })
    }

    /// Take the lock, taking over a stale one, or fail fast if a live process holds it
    pub fn acquire(output_path: &Path) -> Result<Self, HarvestError> {
        let path = Self::lock_path(output_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let mut file = match create_new(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                match Self::holder(output_path) {
                    Some(LockHolder::Stale(pid)) => {
                        log::warn!(
                            "Taking over stale lock {} left by pid {pid}",
                            path.display()
                        );
                        match std::fs::remove_file(&path) {
                            Err(e) if e.kind() != ErrorKind::NotFound => {
                                return Err(PersistenceError::io(&path, e).into());
                            }
                            _ => {}
                        }
                        // Another run may have won the takeover race
                        match create_new(&path) {
                            Ok(f) => f,
                            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                                return Err(Self::locked(path, output_path));
                            }
                            Err(e) => return Err(PersistenceError::io(&path, e).into()),
                        }
                    }
                    _ => return Err(Self::locked(path, output_path)),
                }
            }
            Err(e) => return Err(PersistenceError::io(&path, e).into()),
        };

        writeln!(file, "{}", std::process::id()).map_err(|e| PersistenceError::io(&path, e))?;
        log::debug!("Acquired {}", path.display());
        Ok(Self { path })
    }

    fn locked(path: PathBuf, output_path: &Path) -> HarvestError {
        let holder = match Self::holder(output_path) {
            Some(LockHolder::Running(pid) | LockHolder::Stale(pid)) => Some(pid.to_string()),
            _ => None,
        };
        HarvestError::Locked { path, holder }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn create_new(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

impl Drop for DatasetLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Failed to remove lock {}: {e}", self.path.display());
        }
    }
}
