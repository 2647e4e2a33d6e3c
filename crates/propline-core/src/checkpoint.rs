//! Durable harvest progress.
//!
//! The checkpoint is a small JSON document replaced atomically on every flush:
//!
//! ```json
//! { "cursor": 500, "total_attempted": 500, "total_succeeded": 371,
//!   "last_updated": "2026-10-18T04:12:55.120Z" }
//! ```
//!
//! `cursor` is the index of the first unit whose output has *not* been durably
//! flushed. It never moves backwards within a run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::sink::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub cursor: u64,
    pub total_attempted: u64,
    pub total_succeeded: u64,
    pub last_updated: DateTime<Utc>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            cursor: 0,
            total_attempted: 0,
            total_succeeded: 0,
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl Checkpoint {
    /// Succeeded / attempted, or `None` before the first attempt
    pub fn success_rate(&self) -> Option<f64> {
        (self.total_attempted > 0)
            .then(|| self.total_succeeded as f64 / self.total_attempted as f64)
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved checkpoint; a missing file is a fresh (zero) checkpoint.
    ///
    /// An unreadable file is an error, never a silent reset.
    pub fn load(&self) -> Result<Checkpoint, PersistenceError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No checkpoint at {}, starting fresh", self.path.display());
                return Ok(Checkpoint::default());
            }
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };
        serde_json::from_str(&content).map_err(|e| PersistenceError::Checkpoint {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    /// Atomically replace the checkpoint on disk
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), PersistenceError> {
        let json =
            serde_json::to_vec_pretty(checkpoint).map_err(|e| PersistenceError::Checkpoint {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        write_atomic(&self.path, &json).map_err(|e| PersistenceError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::tmp_path;
    use tempfile::TempDir;

    fn sample() -> Checkpoint {
        Checkpoint {
            cursor: 50,
            total_attempted: 50,
            total_succeeded: 38,
            last_updated: "2026-10-18T04:12:55Z".parse().unwrap(),
        }
    }

    #[test]
    fn missing_file_is_zero_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("cp.json"));
        let cp = store.load().unwrap();
        assert_eq!(cp, Checkpoint::default());
        assert_eq!(cp.cursor, 0);
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("cp.json"));
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), sample());
        assert!(!tmp_path(store.path()).exists());
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("state/nested/cp.json"));
        store.save(&sample()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn file_schema_is_stable() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("cp.json"));
        store.save(&sample()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        let obj = raw.as_object().unwrap();
        let mut keys: Vec<_> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["cursor", "last_updated", "total_attempted", "total_succeeded"]
        );
        assert_eq!(obj["cursor"], 50);
        assert!(obj["last_updated"].as_str().unwrap().starts_with("2026-10-18T04:12:55"));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cp.json");
        std::fs::write(&path, b"{\"cursor\": 1,").unwrap();
        let err = CheckpointStore::new(&path).load().unwrap_err();
        assert!(matches!(err, PersistenceError::Checkpoint { .. }));
    }

    #[test]
    fn success_rate() {
        assert_eq!(Checkpoint::default().success_rate(), None);
        let rate = sample().success_rate().unwrap();
        assert!((rate - 0.76).abs() < 1e-9);
    }
}
