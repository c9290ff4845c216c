//! Advisory file lock serializing writer processes on one project.

use crate::error::ErrorCode;
use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};
use tracing::debug;

/// Default wait before giving up on a held lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_START: Duration = Duration::from_millis(5);
const POLL_MAX: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("{}: lock timed out after {waited:?} at {}", ErrorCode::LockContention.code(), path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("{}: {0}", ErrorCode::StoreFailure.code())]
    Io(#[from] io::Error),
}

impl LockError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Io(_) => ErrorCode::StoreFailure,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// RAII guard for the project-wide exclusive write lock.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Acquire an exclusive advisory lock, polling until `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if another process keeps the lock, or
    /// an I/O error if the lock file cannot be opened.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let start = Instant::now();
        let mut backoff = POLL_START;
        while file.try_lock_exclusive().is_err() {
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            debug!(path = %path.display(), ?waited, "store lock busy");
            thread::sleep(backoff.min(timeout.saturating_sub(waited)));
            backoff = (backoff * 2).min(POLL_MAX);
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Release explicitly. Dropping the guard also releases.
    pub fn release(self) {
        drop(self);
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::{LockError, StoreLock};
    use crate::error::ErrorCode;
    use std::time::Duration;

    #[test]
    fn acquire_and_release() -> Result<(), LockError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("lock");
        let lock = StoreLock::acquire(&path, Duration::from_millis(50))?;
        assert_eq!(lock.path(), path.as_path());
        lock.release();

        let again = StoreLock::acquire(&path, Duration::from_millis(50))?;
        again.release();
        Ok(())
    }

    #[test]
    fn times_out_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        let _held = StoreLock::acquire(&path, Duration::from_millis(50)).unwrap();
        let err = StoreLock::acquire(&path, Duration::from_millis(20)).unwrap_err();

        assert!(matches!(err, LockError::Timeout { path: ref p, .. } if *p == path));
        assert_eq!(err.code(), ErrorCode::LockContention);
        assert!(err.hint().is_some());
    }
}
