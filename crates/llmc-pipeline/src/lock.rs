//! Per-repo advisory lock.
//!
//! Prevents two daemons from processing one repo. The lock is a file
//! created with `create_new` under `.llmc/`; it holds the owner pid and
//! is removed on drop. A lock file older than the staleness window is
//! treated as abandoned (crashed daemon) and replaced.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// A lock file untouched for this long is considered abandoned.
const STALE_AFTER: Duration = Duration::from_secs(3600);

const LOCK_FILE_NAME: &str = "daemon.lock";

/// Held advisory lock; released on drop.
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
}

impl RepoLock {
    /// Acquire the lock under `llmc_dir` (usually `<repo>/.llmc`).
    pub fn acquire(llmc_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(llmc_dir)?;
        let path = llmc_dir.join(LOCK_FILE_NAME);

        match Self::try_create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if is_stale(&path) {
                    warn!(?path, "replacing stale daemon lock");
                    let _ = std::fs::remove_file(&path);
                    Self::try_create(&path).map_err(|_| PipelineError::LockHeld { path })
                } else {
                    Err(PipelineError::LockHeld { path })
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn try_create(path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(?path, "daemon lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .map(|age| age > STALE_AFTER)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_excludes_second_acquirer() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = RepoLock::acquire(tmp.path()).unwrap();
        let err = RepoLock::acquire(tmp.path()).unwrap_err();
        assert!(matches!(err, PipelineError::LockHeld { .. }));
        drop(lock);
        RepoLock::acquire(tmp.path()).unwrap();
    }

    #[test]
    fn test_drop_releases() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let _lock = RepoLock::acquire(tmp.path()).unwrap();
            assert!(tmp.path().join(LOCK_FILE_NAME).exists());
        }
        assert!(!tmp.path().join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn test_stale_lock_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(LOCK_FILE_NAME);
        std::fs::write(&path, "99999\n").unwrap();
        // Age the file past the staleness window.
        let old = std::time::SystemTime::now() - Duration::from_secs(7200);
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_times(std::fs::FileTimes::new().set_modified(old))
            .unwrap();

        RepoLock::acquire(tmp.path()).unwrap();
    }
}
