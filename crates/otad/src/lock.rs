//! Operation lock.
//!
//! One state-changing operation at a time per state directory, whether it
//! comes from the daemon or from otactl. The lock file carries the holder's
//! PID; a lock left behind by a dead process or a corrupt file is recovered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use thiserror::Error;
use tracing::{debug, warn};

pub const LOCK_FILE: &str = "otad.lock";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    /// Operation holding the lock
    pub operation: String,
}

impl LockInfo {
    fn new(operation: &str) -> Self {
        Self {
            pid: process::id(),
            acquired_at: Utc::now(),
            operation: operation.to_string(),
        }
    }

    fn process_exists(&self) -> bool {
        Path::new(&format!("/proc/{}", self.pid)).exists()
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("{} is running in PID {} since {}", .holder.operation, .holder.pid, .holder.acquired_at)]
    Held { holder: LockInfo },

    #[error("lock I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Held operation lock; released on drop
#[derive(Debug)]
pub struct OperationLock {
    path: PathBuf,
}

impl OperationLock {
    pub fn acquire(state_dir: &Path, operation: &str) -> Result<Self, LockError> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(LOCK_FILE);

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let info = LockInfo::new(operation);
                    let content = serde_json::to_string(&info)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    file.write_all(content.as_bytes())?;
                    file.sync_all()?;
                    debug!("Lock acquired for {} (pid {})", operation, info.pid);
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    Self::recover(&path)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(io::Error::new(io::ErrorKind::WouldBlock, "lock contended").into())
    }

    /// Remove a lock nobody holds anymore; fail if it is live.
    fn recover(path: &Path) -> Result<(), LockError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<LockInfo>(&content) {
            Ok(holder) if holder.pid == process::id() || holder.process_exists() => {
                Err(LockError::Held { holder })
            }
            Ok(holder) => {
                warn!("Recovering lock of dead process {} ({})", holder.pid, holder.operation);
                remove_if_present(path)
            }
            Err(e) => {
                warn!("Recovering corrupt lock file: {}", e);
                remove_if_present(path)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn remove_if_present(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Cannot release lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_refused() {
        let dir = TempDir::new().unwrap();
        let lock = OperationLock::acquire(dir.path(), "update").unwrap();
        match OperationLock::acquire(dir.path(), "install") {
            Err(LockError::Held { holder }) => {
                assert_eq!(holder.pid, process::id());
                assert_eq!(holder.operation, "update");
            }
            other => panic!("unexpected {:?}", other),
        }
        drop(lock);
        assert!(OperationLock::acquire(dir.path(), "install").is_ok());
    }

    #[test]
    fn test_dead_holder_is_recovered() {
        let dir = TempDir::new().unwrap();
        let mut stale = LockInfo::new("update");
        stale.pid = 999_999;
        fs::write(dir.path().join(LOCK_FILE), serde_json::to_string(&stale).unwrap()).unwrap();
        let lock = OperationLock::acquire(dir.path(), "run").unwrap();
        assert!(lock.path().exists());
    }

    #[test]
    fn test_corrupt_lock_is_recovered() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(LOCK_FILE), "not json").unwrap();
        assert!(OperationLock::acquire(dir.path(), "run").is_ok());
    }

    #[test]
    fn test_drop_releases() {
        let dir = TempDir::new().unwrap();
        {
            let _lock = OperationLock::acquire(dir.path(), "check").unwrap();
            assert!(dir.path().join(LOCK_FILE).exists());
        }
        assert!(!dir.path().join(LOCK_FILE).exists());
    }
}
