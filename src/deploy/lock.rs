//! Run-level exclusion for one contract on one chain.
//!
//! Locks live in a shared directory rather than next to the records, so two
//! runs against the same factory are serialized even when they write to
//! different output directories or use different network labels.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::crypto::Address;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another run holds {0}")]
    LockHeld(PathBuf),
    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Directory holding run locks unless a caller picks another.
pub fn default_lock_dir() -> PathBuf {
    std::env::temp_dir().join("create2-deploy")
}

/// Exclusive lock on `{dir}/.lock-{chainId}-{target}`, released on drop.
///
/// `target` is the contract every transaction of the run goes through: the
/// CREATE2 factory for deployments, the proxy factory for Safe creation.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Takes the lock or fails immediately if it is held.
    pub fn acquire(dir: &Path, chain_id: u64, target: &Address) -> Result<Self, LockError> {
        fs::create_dir_all(dir).map_err(|source| LockError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(format!(".lock-{chain_id}-{}", target.to_hex()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| LockError::Io {
                path: path.clone(),
                source,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "run lock acquired");
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(LockError::LockHeld(path))
            }
            Err(source) => Err(LockError::Io { path, source }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> Address {
        "0x4e59b44847b379578588920ca78fbf26c0b4956c".parse().unwrap()
    }

    #[test]
    fn test_second_acquire_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let lock = RunLock::acquire(dir.path(), 8453, &factory()).unwrap();
        assert!(lock
            .path()
            .ends_with(".lock-8453-4e59b44847b379578588920ca78fbf26c0b4956c"));

        let second = RunLock::acquire(dir.path(), 8453, &factory());
        assert!(matches!(second, Err(LockError::LockHeld(_))));

        // other chains and other factories are independent
        assert!(RunLock::acquire(dir.path(), 42161, &factory()).is_ok());
        assert!(RunLock::acquire(dir.path(), 8453, &Address::ZERO).is_ok());
    }

    #[test]
    fn test_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        drop(RunLock::acquire(dir.path(), 8453, &factory()).unwrap());
        assert!(RunLock::acquire(dir.path(), 8453, &factory()).is_ok());
    }
}
